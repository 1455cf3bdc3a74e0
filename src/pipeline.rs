use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::RunConfig;
use crate::detection::{Detection, ImageResult};
use crate::geo::image_center;
use crate::model::Detect;
use crate::output::{debug_path, write_result};
use crate::render::DebugRenderer;

/// Files directly inside `dir` whose extension is one of `extensions`
/// (case-insensitive), sorted by path.
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("input directory {} does not exist", dir.display());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_empty_file(path: &Path) -> Result<bool> {
    let metadata = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(metadata.len() == 0)
}

/// File stem used to name every output of an image.
pub fn image_id(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive an image id from {}", path.display()))
}

/// Counters for one batch run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub images: usize,
    pub written: usize,
    pub skipped: usize,
    pub detections: usize,
    pub filtered_out: usize,
}

/// Runs the detector over every matching image in `config.input_dir`.
pub fn run<D: Detect>(config: &RunConfig, detector: &D) -> Result<RunSummary> {
    config.validate()?;
    let images = list_images(&config.input_dir, &config.extensions)?;
    tracing::info!(
        "found {} image(s) in {}",
        images.len(),
        config.input_dir.display()
    );
    match &config.class_filter {
        Some(ids) => {
            let names: Vec<String> = ids.iter().map(|id| detector.class_names().label(*id)).collect();
            tracing::info!("class filter active, keeping only {:?} {:?}", ids, names);
        }
        None => tracing::info!("no class filter, keeping every class"),
    }

    let renderer = if config.debug.enabled {
        Some(DebugRenderer::new(config.debug.font.as_deref(), config.debug.thickness)?)
    } else {
        None
    };

    let mut summary = RunSummary {
        images: images.len(),
        ..RunSummary::default()
    };
    for path in &images {
        let outcome = is_empty_file(path).and_then(|empty| {
            if empty {
                Ok(None)
            } else {
                process_image(config, detector, renderer.as_ref(), path).map(Some)
            }
        });
        match outcome {
            Ok(None) => {
                tracing::warn!("skipping empty file {}", path.display());
                summary.skipped += 1;
            }
            Ok(Some((kept, dropped))) => {
                summary.written += 1;
                summary.detections += kept;
                summary.filtered_out += dropped;
            }
            Err(e) if config.keep_going => {
                tracing::warn!("skipping {}: {:#}", path.display(), e);
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "inference complete: {} written, {} skipped, {} detections kept, {} filtered out",
        summary.written,
        summary.skipped,
        summary.detections,
        summary.filtered_out
    );
    Ok(summary)
}

/// Detects, filters and writes one image. Returns (kept, filtered out) counts.
fn process_image<D: Detect>(
    config: &RunConfig,
    detector: &D,
    renderer: Option<&DebugRenderer>,
    path: &Path,
) -> Result<(usize, usize)> {
    let image_id = image_id(path)?;
    tracing::info!("processing {}", path.display());

    let img = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    let candidates = detector
        .detect(&img, &config.inference)
        .with_context(|| format!("detection failed for {}", path.display()))?;

    let total = candidates.len();
    let names = detector.class_names();
    let detections: Vec<Detection> = candidates
        .into_iter()
        .filter(|c| config.keeps_class(c.class_id))
        .map(|c| Detection {
            class_id: c.class_id,
            label: config.include_labels.then(|| names.label(c.class_id)),
            confidence: c.confidence,
            bbox: c.bbox,
        })
        .collect();
    let dropped = total - detections.len();

    for det in &detections {
        tracing::debug!(
            "{}: {} {:.2}",
            image_id,
            names.label(det.class_id),
            det.confidence
        );
    }

    let result = ImageResult {
        image_id: image_id.clone(),
        detections,
        image_center: image_center(path, &config.geo),
        class_filter: config.class_filter.clone(),
    };
    let written = write_result(&config.detections_dir, &result)?;
    tracing::info!(
        "{}: {} detection(s) -> {}",
        image_id,
        result.detections.len(),
        written.display()
    );

    if let Some(renderer) = renderer {
        renderer.save(&img, &result.detections, &debug_path(&config.debug_dir, &image_id))?;
    }
    Ok((result.detections.len(), dropped))
}
