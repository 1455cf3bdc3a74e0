pub mod cli;
pub mod config;
pub mod detection;
pub mod geo;
pub mod mapping;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod render;
pub mod weights;

pub use crate::cli::{Args, Command, DetectArgs};
pub use crate::config::{InferenceConfig, Preset, RunConfig};
pub use crate::detection::{BoundingBox, Detection, GeoPoint, ImageResult};
pub use crate::mapping::{ClassNames, load_class_mapping};
pub use crate::model::{Detect, OnnxDetector, OnnxModel};
pub use crate::pipeline::{RunSummary, run};
pub use crate::postprocess::{Candidate, non_maximum_suppression};
pub use crate::preprocess::{Letterbox, Processor};
