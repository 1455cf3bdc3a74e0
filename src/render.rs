use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::Detection;

const CAPTION_SCALE: f32 = 18.0;

// ultralytics colour palette
const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56], [255, 157, 151], [255, 112, 31], [255, 178, 29], [207, 210, 49],
    [72, 249, 10], [146, 204, 23], [61, 219, 134], [26, 147, 52], [0, 212, 187],
    [44, 153, 168], [0, 194, 255], [52, 69, 147], [100, 115, 255], [0, 24, 236],
    [132, 56, 255], [82, 0, 133], [203, 56, 255], [255, 149, 200], [255, 55, 199],
];

pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draws detections onto copies of input images.
pub struct DebugRenderer {
    font: Option<FontVec>,
    thickness: u32,
}

impl DebugRenderer {
    pub fn new(font: Option<&Path>, thickness: u32) -> Result<Self> {
        let font = match font {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("failed to read font {}", path.display()))?;
                Some(FontVec::try_from_vec(bytes).with_context(|| format!("invalid font {}", path.display()))?)
            }
            None => None,
        };
        Ok(Self {
            font,
            thickness: thickness.max(1),
        })
    }

    pub fn draw(&self, img: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = img.to_rgb8();
        let (width, height) = canvas.dimensions();

        for det in detections {
            let color = class_color(det.class_id);
            let left = det.bbox.xmin.round() as i32;
            let top = det.bbox.ymin.round() as i32;
            let w = det.bbox.width().round().max(1.0) as u32;
            let h = det.bbox.height().round().max(1.0) as u32;

            // one pixel ring per unit of thickness, growing inwards
            for t in 0..self.thickness.min(w.min(h).div_ceil(2)) {
                let rect = Rect::at(left + t as i32, top + t as i32).of_size(w - 2 * t, h - 2 * t);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let caption = match &det.label {
                    Some(label) => format!("{} {:.2}", label, det.confidence),
                    None => format!("{} {:.2}", det.class_id, det.confidence),
                };
                let text_h = CAPTION_SCALE as i32 + 2;
                let y = if top >= text_h { top - text_h } else { top };
                let text_w = (caption.len() as f32 * CAPTION_SCALE * 0.55) as u32 + 4;
                if (left as u32) < width && (y as u32) < height {
                    draw_filled_rect_mut(&mut canvas, Rect::at(left, y).of_size(text_w, text_h as u32), color);
                    draw_text_mut(
                        &mut canvas,
                        Rgb([255, 255, 255]),
                        left + 2,
                        y + 1,
                        PxScale::from(CAPTION_SCALE),
                        font,
                        &caption,
                    );
                }
            }
        }
        canvas
    }

    /// Renders and saves the annotated image; format follows the extension.
    pub fn save(&self, img: &DynamicImage, detections: &[Detection], output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.draw(img, detections)
            .save(output_path)
            .with_context(|| format!("failed to write debug image {}", output_path.display()))?;
        Ok(())
    }
}
