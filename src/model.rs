use anyhow::{Context, Result};
use image::DynamicImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};

use crate::config::{InferenceConfig, RunConfig};
use crate::mapping::{ClassNames, load_class_mapping};
use crate::postprocess::{Candidate, decode_predictions, non_maximum_suppression, rescale};
use crate::preprocess::Processor;
use crate::weights::resolve_weights;

/// A loaded detector: inference plus the class id to label mapping.
pub trait Detect {
    fn class_names(&self) -> &ClassNames;

    /// Runs detection on one image. Boxes come back in original image pixels,
    /// sorted by descending confidence.
    fn detect(&self, img: &DynamicImage, config: &InferenceConfig) -> Result<Vec<Candidate>>;
}

pub struct OnnxModel {
    provider: [ExecutionProviderDispatch; 1],
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        let provider = if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        };
        Self { provider }
    }

    pub fn load_model(&self, model_path: &std::path::Path) -> Result<Session> {
        let session = SessionBuilder::new()?
            .with_execution_providers(self.provider.clone())?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model {}", model_path.display()))?;
        Ok(session)
    }
}

/// YOLOv8-style ONNX detector.
pub struct OnnxDetector {
    session: Session,
    names: ClassNames,
    /// Square input side when the graph fixes it.
    fixed_size: Option<u32>,
}

impl OnnxDetector {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let path = resolve_weights(&config.model)?;
        tracing::info!("loading model {} from {}", config.model, path.display());
        let session = OnnxModel::new(config.cuda).load_model(&path)?;

        let names = match &config.labels {
            Some(labels) => load_class_mapping(labels)?,
            None => metadata_names(&session).unwrap_or_else(|| {
                tracing::warn!("model carries no class names, using COCO labels");
                ClassNames::coco()
            }),
        };
        tracing::info!("model exposes {} classes", names.len());

        let fixed_size = fixed_input_size(&session);
        if let Some(size) = fixed_size {
            if size != config.inference.aligned_size() {
                tracing::warn!(
                    "model input is fixed at {size}px, ignoring inference size {}",
                    config.inference.inference_size
                );
            }
        }

        Ok(Self {
            session,
            names,
            fixed_size,
        })
    }
}

fn metadata_names(session: &Session) -> Option<ClassNames> {
    let raw = session.metadata().ok()?.custom("names").ok().flatten()?;
    ClassNames::from_metadata(&raw)
}

fn fixed_input_size(session: &Session) -> Option<u32> {
    let dims = session.inputs.first()?.input_type.tensor_dimensions()?;
    match dims.as_slice() {
        [_, _, h, w] if *h > 0 && h == w => u32::try_from(*h).ok(),
        _ => None,
    }
}

impl Detect for OnnxDetector {
    fn class_names(&self) -> &ClassNames {
        &self.names
    }

    fn detect(&self, img: &DynamicImage, config: &InferenceConfig) -> Result<Vec<Candidate>> {
        let processor = Processor::new(self.fixed_size.unwrap_or_else(|| config.aligned_size()));
        let (xs, letterbox) = processor.preprocess(img)?;

        let t = std::time::Instant::now();
        let ys = self.session.run(ort::inputs![xs.view()]?)?;
        tracing::debug!("[model]: {:?}", t.elapsed());

        let (_name, output) = ys.iter().next().context("model produced no outputs")?;
        let output = output.try_extract_tensor::<f32>()?;

        let candidates =
            decode_predictions(&output, config.confidence_threshold, self.names.num_classes())?;
        let kept = non_maximum_suppression(
            candidates,
            config.iou_threshold,
            config.class_agnostic,
            config.max_detections,
        );
        Ok(rescale(kept, &letterbox))
    }
}
