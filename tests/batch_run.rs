use std::cell::Cell;
use std::fs;
use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, RgbImage};

use aves_detect::config::{BASE_LAT, BASE_LON};
use aves_detect::output::{load_results, read_result};
use aves_detect::{
    BoundingBox, Candidate, ClassNames, Detect, InferenceConfig, Preset, RunConfig, run,
};

/// Returns a bird and a person for every image, or nothing when `empty` is set.
struct FakeDetector {
    names: ClassNames,
    empty: bool,
    calls: Cell<usize>,
}

impl FakeDetector {
    fn new() -> Self {
        Self {
            names: ClassNames::coco(),
            empty: false,
            calls: Cell::new(0),
        }
    }

    fn empty() -> Self {
        Self {
            empty: true,
            ..Self::new()
        }
    }
}

impl Detect for FakeDetector {
    fn class_names(&self) -> &ClassNames {
        &self.names
    }

    fn detect(&self, img: &DynamicImage, _config: &InferenceConfig) -> Result<Vec<Candidate>> {
        self.calls.set(self.calls.get() + 1);
        if self.empty {
            return Ok(Vec::new());
        }
        let (w, h) = (img.width() as f32, img.height() as f32);
        Ok(vec![
            Candidate {
                class_id: 14,
                confidence: 0.91,
                bbox: BoundingBox::from_corners(1.0, 1.0, w / 2.0, h / 2.0),
            },
            Candidate {
                class_id: 0,
                confidence: 0.42,
                bbox: BoundingBox::from_corners(w / 2.0, h / 2.0, w - 1.0, h - 1.0),
            },
        ])
    }
}

fn write_jpg(dir: &Path, name: &str) {
    RgbImage::from_pixel(64, 48, image::Rgb([90, 120, 60]))
        .save(dir.join(name))
        .unwrap();
}

fn config_for(root: &Path, preset: Preset) -> RunConfig {
    let input = root.join("images");
    fs::create_dir_all(&input).unwrap();
    RunConfig {
        input_dir: input,
        detections_dir: root.join("outputs/detections"),
        debug_dir: root.join("outputs/debug"),
        ..RunConfig::from_preset(preset)
    }
}

#[test]
fn survey_run_keeps_only_birds_with_labels() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), Preset::Survey);
    write_jpg(&config.input_dir, "IMG_0002.jpg");
    write_jpg(&config.input_dir, "IMG_0001.jpg");
    fs::write(config.input_dir.join("readme.txt"), "not an image").unwrap();

    let detector = FakeDetector::new();
    let summary = run(&config, &detector).unwrap();
    assert_eq!(summary.images, 2);
    assert_eq!(summary.written, 2);
    assert_eq!(summary.detections, 2);
    assert_eq!(summary.filtered_out, 2);
    assert_eq!(detector.calls.get(), 2);

    let results = load_results(&config.detections_dir).unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.image_id.as_str()).collect();
    assert_eq!(ids, vec!["IMG_0001", "IMG_0002"]);

    for result in &results {
        assert_eq!(result.class_filter, Some(vec![14]));
        assert_eq!(result.detections.len(), 1);
        for det in &result.detections {
            assert_eq!(det.class_id, 14);
            assert_eq!(det.label.as_deref(), Some("bird"));
            assert!(det.bbox.xmin <= det.bbox.xmax && det.bbox.ymin <= det.bbox.ymax);
        }
        assert!((result.image_center.lat - BASE_LAT).abs() <= 0.01 + 1e-12);
        assert!((result.image_center.lon - BASE_LON).abs() <= 0.01 + 1e-12);
        assert!(config.debug_dir.join(format!("{}_debug.jpg", result.image_id)).is_file());
    }
}

#[test]
fn baseline_run_keeps_every_class_without_labels() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), Preset::Baseline);
    write_jpg(&config.input_dir, "a.jpg");

    run(&config, &FakeDetector::new()).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.detections_dir.join("a.json")).unwrap()).unwrap();
    let detections = raw["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.get("label").is_none()));
    assert_eq!(detections[0]["bbox"].as_array().unwrap().len(), 4);
    assert!(raw.get("class_filter").is_none());
    assert!(raw["image_center"]["lat"].is_f64());
    assert!(!config.debug_dir.exists());
}

#[test]
fn images_without_detections_get_empty_arrays() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), Preset::Survey);
    write_jpg(&config.input_dir, "empty_sky.jpg");

    run(&config, &FakeDetector::empty()).unwrap();

    let raw = fs::read_to_string(config.detections_dir.join("empty_sky.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["detections"], serde_json::json!([]));
}

#[test]
fn empty_input_directory_writes_nothing() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), Preset::Survey);

    let summary = run(&config, &FakeDetector::new()).unwrap();
    assert_eq!(summary.images, 0);
    assert!(!config.detections_dir.exists());
}

#[test]
fn second_run_overwrites_same_files() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), Preset::Survey);
    write_jpg(&config.input_dir, "heron.jpg");

    run(&config, &FakeDetector::new()).unwrap();
    let first = read_result(&config.detections_dir.join("heron.json")).unwrap();
    run(&config, &FakeDetector::new()).unwrap();
    let second = read_result(&config.detections_dir.join("heron.json")).unwrap();

    assert_eq!(first.image_id, second.image_id);
    assert_eq!(first.detections, second.detections);
    assert_eq!(fs::read_dir(&config.detections_dir).unwrap().count(), 1);
}

#[test]
fn corrupt_image_aborts_unless_keep_going() {
    let root = tempfile::tempdir().unwrap();
    let mut config = config_for(root.path(), Preset::Baseline);
    write_jpg(&config.input_dir, "good.jpg");
    fs::write(config.input_dir.join("bad.jpg"), b"definitely not a jpeg").unwrap();
    fs::write(config.input_dir.join("zero.jpg"), b"").unwrap();

    let err = run(&config, &FakeDetector::new()).unwrap_err();
    assert!(format!("{err:#}").contains("bad.jpg"));

    config.keep_going = true;
    let summary = run(&config, &FakeDetector::new()).unwrap();
    assert_eq!(summary.images, 3);
    assert_eq!(summary.written, 1);
    assert_eq!(summary.skipped, 2);
    assert!(config.detections_dir.join("good.json").is_file());
    assert!(!config.detections_dir.join("bad.json").exists());
}

#[test]
fn missing_input_directory_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let config = RunConfig {
        input_dir: root.path().join("nope"),
        ..RunConfig::from_preset(Preset::Baseline)
    };
    assert!(run(&config, &FakeDetector::new()).is_err());
}
