use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

/// The 80 COCO classes in the order YOLOv8 exports them.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Class id to label lookup exposed by a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNames {
    names: BTreeMap<u32, String>,
}

impl ClassNames {
    pub fn coco() -> Self {
        Self::from_iter(COCO_LABELS.iter().enumerate().map(|(id, name)| (id as u32, name.to_string())))
    }

    pub fn get(&self, class_id: u32) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    /// Label for `class_id`, or the numeric id when the model does not name it.
    pub fn label(&self, class_id: u32) -> String {
        match self.get(class_id) {
            Some(name) => name.to_string(),
            None => class_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Width of the score block this mapping implies: highest id + 1.
    pub fn num_classes(&self) -> Option<usize> {
        self.names.keys().next_back().map(|&id| id as usize + 1)
    }

    /// Parses the `names` entry ultralytics writes into ONNX metadata,
    /// a Python dict literal such as `{0: 'person', 1: 'bicycle'}`.
    pub fn from_metadata(raw: &str) -> Option<Self> {
        let re = Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#).ok()?;
        let names = Self::from_iter(re.captures_iter(raw).filter_map(|caps| {
            let id = caps[1].parse::<u32>().ok()?;
            let name = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            Some((id, name))
        }));
        if names.is_empty() { None } else { Some(names) }
    }
}

impl FromIterator<(u32, String)> for ClassNames {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

/// Reads a labels file, one name per line; the line index is the class id.
pub fn load_class_mapping(file_path: &Path) -> Result<ClassNames> {
    let file = File::open(file_path)
        .with_context(|| format!("failed to open labels file {}", file_path.display()))?;
    let reader = BufReader::new(file);

    let mut names = Vec::new();
    for (id, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", file_path.display()))?;
        let name = line.trim();
        if !name.is_empty() {
            names.push((id as u32, name.to_string()));
        }
    }
    Ok(ClassNames::from_iter(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn coco_class_14_is_bird() {
        let names = ClassNames::coco();
        assert_eq!(names.len(), 80);
        assert_eq!(names.get(14), Some("bird"));
        assert_eq!(names.label(0), "person");
    }

    #[test]
    fn unknown_class_falls_back_to_id() {
        assert_eq!(ClassNames::coco().label(412), "412");
    }

    #[test]
    fn parses_ultralytics_metadata() {
        let names = ClassNames::from_metadata("{0: 'person', 1: 'bicycle', 14: \"bird\"}").unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.get(1), Some("bicycle"));
        assert_eq!(names.get(14), Some("bird"));
        assert_eq!(names.num_classes(), Some(15));
    }

    #[test]
    fn num_classes_covers_gaps() {
        assert_eq!(ClassNames::coco().num_classes(), Some(80));
        let empty: ClassNames = std::iter::empty().collect();
        assert_eq!(empty.num_classes(), None);
    }

    #[test]
    fn rejects_metadata_without_entries() {
        assert!(ClassNames::from_metadata("{}").is_none());
        assert!(ClassNames::from_metadata("not a dict").is_none());
    }

    #[test]
    fn labels_file_is_zero_based() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "heron\n  egret  \nspoonbill").unwrap();
        let names = load_class_mapping(file.path()).unwrap();
        assert_eq!(names.get(0), Some("heron"));
        assert_eq!(names.get(1), Some("egret"));
        assert_eq!(names.get(2), Some("spoonbill"));
    }

    #[test]
    fn missing_labels_file_names_the_path() {
        let err = load_class_mapping(Path::new("/nonexistent/labels.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/labels.txt"));
    }
}
