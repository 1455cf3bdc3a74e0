use serde::{Deserialize, Serialize};

/// Axis aligned box in original image pixels, serialized as `[xmin, ymin, xmax, ymax]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Builds a box from two corners given in any order.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            xmin: x1.min(x2),
            ymin: y1.min(y2),
            xmax: x1.max(x2),
            ymax: y1.max(y2),
        }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::from_corners(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union, 0.0 when the union is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_x1 = self.xmin.max(other.xmin);
        let inter_y1 = self.ymin.max(other.ymin);
        let inter_x2 = self.xmax.min(other.xmax);
        let inter_y2 = self.ymax.min(other.ymax);

        let inter_area = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= 0.0 { 0.0 } else { inter_area / union_area }
    }

    /// Clamps the box into `[0, width] x [0, height]`.
    pub fn clip(&self, width: f32, height: f32) -> Self {
        Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.xmin <= self.xmax && self.ymin <= self.ymax
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self {
            xmin: v[0],
            ymin: v[1],
            xmax: v[2],
            ymax: v[3],
        }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.xmin, b.ymin, b.xmax, b.ymax]
    }
}

/// One object found by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Everything written for one input image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub image_id: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
    pub image_center: GeoPoint,
    /// Class ids the detections were restricted to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_filter: Option<Vec<u32>>,
}
