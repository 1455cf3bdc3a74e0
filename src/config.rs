use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const BASE_LAT: f64 = 29.9032;
pub const BASE_LON: f64 = -91.9018;
pub const DEFAULT_JITTER: f64 = 0.01;

/// COCO class id of `bird`.
pub const BIRD_CLASS_ID: u32 = 14;

/// Largest YOLOv8 feature stride. Input sides must be a multiple of it.
pub const STRIDE: u32 = 32;

/// Settings handed to the detector for every image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Side of the square letterboxed input, in pixels.
    pub inference_size: u32,
    pub max_detections: usize,
    pub class_agnostic: bool,
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.confidence_threshold),
            "confidence threshold {} is outside [0, 1]",
            self.confidence_threshold
        );
        ensure!(
            (0.0..=1.0).contains(&self.iou_threshold),
            "iou threshold {} is outside [0, 1]",
            self.iou_threshold
        );
        ensure!(self.inference_size > 0, "inference size must be positive");
        ensure!(self.max_detections > 0, "max detections must be positive");
        Ok(())
    }

    /// `inference_size` rounded up to the next multiple of [`STRIDE`].
    pub fn aligned_size(&self) -> u32 {
        self.inference_size.max(1).div_ceil(STRIDE).saturating_mul(STRIDE)
    }

    /// Rounds `inference_size` up to a stride multiple, warning when it changes.
    pub fn align_to_stride(&mut self) {
        let aligned = self.aligned_size();
        if aligned != self.inference_size {
            tracing::warn!(
                "inference size {} is not a multiple of {STRIDE}, using {aligned}",
                self.inference_size
            );
            self.inference_size = aligned;
        }
    }
}

/// Named bundles of defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Detector library defaults, every class kept.
    #[default]
    Baseline,
    /// High resolution, low threshold survey tuned for birds.
    Survey,
}

impl Preset {
    pub fn inference(self) -> InferenceConfig {
        match self {
            Preset::Baseline => InferenceConfig {
                confidence_threshold: 0.25,
                iou_threshold: 0.7,
                inference_size: 640,
                max_detections: 300,
                class_agnostic: false,
            },
            Preset::Survey => InferenceConfig {
                confidence_threshold: 0.15,
                iou_threshold: 0.2,
                inference_size: 1536,
                max_detections: 1000,
                class_agnostic: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoSource {
    /// Base coordinate plus uniform random jitter. A placeholder, not a location.
    #[default]
    Jitter,
    /// GPS tags from the image EXIF block, jitter when absent.
    Exif,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoConfig {
    pub source: GeoSource,
    pub base_lat: f64,
    pub base_lon: f64,
    /// Half width of the jitter range, in degrees.
    pub jitter: f64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            source: GeoSource::Jitter,
            base_lat: BASE_LAT,
            base_lon: BASE_LON,
            jitter: DEFAULT_JITTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    pub enabled: bool,
    /// TTF used for box captions; boxes only when unset.
    pub font: Option<PathBuf>,
    pub thickness: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            font: None,
            thickness: 2,
        }
    }
}

/// Everything one batch run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub extensions: Vec<String>,
    pub detections_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub model: String,
    pub labels: Option<PathBuf>,
    pub cuda: bool,
    pub inference: InferenceConfig,
    pub class_filter: Option<Vec<u32>>,
    pub include_labels: bool,
    pub debug: DebugConfig,
    pub geo: GeoConfig,
    pub keep_going: bool,
}

impl RunConfig {
    pub fn from_preset(preset: Preset) -> Self {
        let survey = preset == Preset::Survey;
        Self {
            input_dir: PathBuf::from("images"),
            extensions: vec!["jpg".to_string()],
            detections_dir: PathBuf::from("outputs/detections"),
            debug_dir: PathBuf::from("outputs/debug"),
            model: "yolov8n".to_string(),
            labels: None,
            cuda: false,
            inference: preset.inference(),
            class_filter: survey.then(|| vec![BIRD_CLASS_ID]),
            include_labels: survey,
            debug: DebugConfig {
                enabled: survey,
                ..DebugConfig::default()
            },
            geo: GeoConfig::default(),
            keep_going: false,
        }
    }

    /// Applies every field the file sets on top of `self`.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(v) = file.input_dir {
            self.input_dir = v;
        }
        if let Some(v) = file.extensions {
            self.extensions = v;
        }
        if let Some(v) = file.detections_dir {
            self.detections_dir = v;
        }
        if let Some(v) = file.debug_dir {
            self.debug_dir = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.labels {
            self.labels = Some(v);
        }
        if let Some(v) = file.cuda {
            self.cuda = v;
        }
        if let Some(v) = file.confidence_threshold {
            self.inference.confidence_threshold = v;
        }
        if let Some(v) = file.iou_threshold {
            self.inference.iou_threshold = v;
        }
        if let Some(v) = file.inference_size {
            self.inference.inference_size = v;
        }
        if let Some(v) = file.max_detections {
            self.inference.max_detections = v;
        }
        if let Some(v) = file.class_agnostic {
            self.inference.class_agnostic = v;
        }
        if let Some(v) = file.class_filter {
            // An empty list in the file switches filtering off.
            self.class_filter = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = file.include_labels {
            self.include_labels = v;
        }
        if let Some(v) = file.debug {
            self.debug.enabled = v;
        }
        if let Some(v) = file.font {
            self.debug.font = Some(v);
        }
        if let Some(v) = file.thickness {
            self.debug.thickness = v;
        }
        if let Some(v) = file.geo_source {
            self.geo.source = v;
        }
        if let Some(v) = file.base_lat {
            self.geo.base_lat = v;
        }
        if let Some(v) = file.base_lon {
            self.geo.base_lon = v;
        }
        if let Some(v) = file.jitter {
            self.geo.jitter = v;
        }
        if let Some(v) = file.keep_going {
            self.keep_going = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.inference.validate()?;
        ensure!(!self.extensions.is_empty(), "at least one image extension is required");
        ensure!(self.debug.thickness > 0, "debug box thickness must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.geo.jitter),
            "jitter {} must be within [0, 1] degrees",
            self.geo.jitter
        );
        if !(-90.0..=90.0).contains(&self.geo.base_lat) {
            bail!("base latitude {} is outside [-90, 90]", self.geo.base_lat);
        }
        if !(-180.0..=180.0).contains(&self.geo.base_lon) {
            bail!("base longitude {} is outside [-180, 180]", self.geo.base_lon);
        }
        Ok(())
    }

    pub fn keeps_class(&self, class_id: u32) -> bool {
        match &self.class_filter {
            Some(ids) => ids.contains(&class_id),
            None => true,
        }
    }
}

/// On-disk config, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub preset: Option<Preset>,
    pub input_dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub detections_dir: Option<PathBuf>,
    pub debug_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub labels: Option<PathBuf>,
    pub cuda: Option<bool>,
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub inference_size: Option<u32>,
    pub max_detections: Option<usize>,
    pub class_agnostic: Option<bool>,
    pub class_filter: Option<Vec<u32>>,
    pub include_labels: Option<bool>,
    pub debug: Option<bool>,
    pub font: Option<PathBuf>,
    pub thickness: Option<u32>,
    pub geo_source: Option<GeoSource>,
    pub base_lat: Option<f64>,
    pub base_lon: Option<f64>,
    pub jitter: Option<f64>,
    pub keep_going: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}
