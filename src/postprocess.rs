use std::cmp::Reverse;
use std::collections::BTreeMap;

use anyhow::{Result, bail};
use ndarray::{ArrayViewD, Axis, Ix2};
use ordered_float::OrderedFloat;

use crate::detection::BoundingBox;
use crate::preprocess::Letterbox;

/// Upper bound on boxes fed into NMS, highest confidence first.
pub const MAX_NMS_CANDIDATES: usize = 30_000;

/// A box that survived the confidence threshold, before labels are attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Decodes a YOLOv8 detection head.
///
/// The output is `(1, 4 + classes, anchors)` with rows `cx, cy, w, h` followed by one
/// score per class. Exports with the last two axes swapped are accepted too. When
/// `num_classes` is known the attribute axis is the one of length `4 + num_classes`;
/// otherwise the shorter axis is taken. Each anchor keeps its best class if that
/// score reaches `threshold`.
pub fn decode_predictions(
    output: &ArrayViewD<f32>,
    threshold: f32,
    num_classes: Option<usize>,
) -> Result<Vec<Candidate>> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
        bail!("unexpected detector output shape {:?}", shape);
    }
    let preds = output.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;
    // attributes must run along axis 0
    let (rows, cols) = (preds.shape()[0], preds.shape()[1]);
    let transpose = match num_classes.map(|nc| nc + 4) {
        Some(attrs) if rows == attrs => false,
        Some(attrs) if cols == attrs => true,
        _ => rows > cols,
    };
    let preds = if transpose { preds.reversed_axes() } else { preds };
    if preds.shape()[0] <= 4 {
        bail!("detector output has no class scores: shape {:?}", shape);
    }

    let mut candidates = Vec::new();
    for anchor in preds.axis_iter(Axis(1)) {
        let (class_id, confidence) = anchor
            .iter()
            .skip(4)
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best_idx, best), (i, &score)| {
                if score > best { (i, score) } else { (best_idx, best) }
            });
        if confidence >= threshold {
            candidates.push(Candidate {
                class_id: class_id as u32,
                confidence,
                bbox: BoundingBox::from_center(anchor[0], anchor[1], anchor[2], anchor[3]),
            });
        }
    }
    Ok(candidates)
}

fn suppress(mut indices: Vec<usize>, candidates: &[Candidate], iou_threshold: f32, keep: &mut Vec<usize>) {
    indices.sort_by_key(|&i| Reverse(OrderedFloat(candidates[i].confidence)));

    let mut suppressed = vec![false; indices.len()];
    for i in 0..indices.len() {
        if suppressed[i] {
            continue;
        }
        let idx_i = indices[i];
        keep.push(idx_i);
        for j in (i + 1)..indices.len() {
            if suppressed[j] {
                continue;
            }
            let iou = candidates[idx_i].bbox.iou(&candidates[indices[j]].bbox);
            if iou > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
}

/// Greedy NMS, per class or across all classes, capped at `max_detections`.
/// The result is ordered by descending confidence.
pub fn non_maximum_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    class_agnostic: bool,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by_key(|c| Reverse(OrderedFloat(c.confidence)));
    candidates.truncate(MAX_NMS_CANDIDATES);

    let mut keep: Vec<usize> = Vec::new();
    if class_agnostic {
        suppress((0..candidates.len()).collect(), &candidates, iou_threshold, &mut keep);
    } else {
        let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, c) in candidates.iter().enumerate() {
            by_class.entry(c.class_id).or_default().push(i);
        }
        for (_, indices) in by_class {
            suppress(indices, &candidates, iou_threshold, &mut keep);
        }
    }

    // candidates are already confidence sorted, so index order is confidence order
    keep.sort_unstable();
    keep.truncate(max_detections);
    keep.into_iter().map(|i| candidates[i]).collect()
}

/// Moves boxes from model input space into original image pixels, clipped to the image.
pub fn rescale(candidates: Vec<Candidate>, letterbox: &Letterbox) -> Vec<Candidate> {
    let (w, h) = (letterbox.orig_width as f32, letterbox.orig_height as f32);
    candidates
        .into_iter()
        .map(|c| {
            let (x1, y1) = letterbox.to_original(c.bbox.xmin, c.bbox.ymin);
            let (x2, y2) = letterbox.to_original(c.bbox.xmax, c.bbox.ymax);
            Candidate {
                bbox: BoundingBox::from_corners(x1, y1, x2, y2).clip(w, h),
                ..c
            }
        })
        .collect()
}
