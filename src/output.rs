use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::detection::ImageResult;
use crate::mapping::ClassNames;

pub fn result_path(dir: &Path, image_id: &str) -> PathBuf {
    dir.join(format!("{image_id}.json"))
}

pub fn debug_path(dir: &Path, image_id: &str) -> PathBuf {
    dir.join(format!("{image_id}_debug.jpg"))
}

/// Writes `<dir>/<image_id>.json`, replacing any previous file.
pub fn write_result(dir: &Path, result: &ImageResult) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = result_path(dir, &result.image_id);
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(path)
}

pub fn read_result(path: &Path) -> Result<ImageResult> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid result file {}", path.display()))
}

/// Loads every `*.json` result in `dir`, ordered by file name.
pub fn load_results(dir: &Path) -> Result<Vec<ImageResult>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| read_result(p)).collect()
}

/// Counts over a set of result files.
#[derive(Debug, Default, PartialEq)]
pub struct ResultSummary {
    pub images: usize,
    pub empty_images: usize,
    pub detections: usize,
    pub by_label: BTreeMap<String, usize>,
}

impl ResultSummary {
    /// Tallies detections by label. Detections stored without a label are named
    /// through `names`, so labelled and unlabelled runs count under the same key.
    pub fn from_results(results: &[ImageResult], names: &ClassNames) -> Self {
        let mut summary = Self {
            images: results.len(),
            ..Self::default()
        };
        for result in results {
            if result.detections.is_empty() {
                summary.empty_images += 1;
            }
            for det in &result.detections {
                summary.detections += 1;
                let key = det.label.clone().unwrap_or_else(|| names.label(det.class_id));
                *summary.by_label.entry(key).or_default() += 1;
            }
        }
        summary
    }
}

impl fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "images:             {}", self.images)?;
        writeln!(f, "without detections: {}", self.empty_images)?;
        writeln!(f, "detections:         {}", self.detections)?;
        for (label, count) in &self.by_label {
            writeln!(f, "  {label:<20} {count}")?;
        }
        Ok(())
    }
}
