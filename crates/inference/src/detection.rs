use crate::backend::InferenceOutput;
use crate::classes::ClassNames;
use serde::Serialize;

/// A detected object as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox_xyxy: [f32; 4],
    pub conf: f32,
    pub cls: usize,
    pub label: String,
}

/// Flattens backend output into labelled detections, preserving order.
///
/// Box, confidence and class of each record come from the same raw detection.
/// An absent detection set yields an empty list.
pub fn format_detections(output: &InferenceOutput, names: &ClassNames) -> Vec<Detection> {
    let Some(boxes) = &output.boxes else {
        return Vec::new();
    };

    boxes
        .iter()
        .map(|raw| Detection {
            bbox_xyxy: raw.xyxy,
            conf: raw.confidence,
            cls: raw.class_id,
            label: names.label(raw.class_id).into_owned(),
        })
        .collect()
}
