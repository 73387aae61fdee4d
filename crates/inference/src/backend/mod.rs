use crate::classes::ClassNames;
use image::RgbImage;
use std::path::Path;

#[cfg(feature = "ort-backend")]
pub mod ort;

pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU: f32 = 0.45;
pub const DEFAULT_IMAGE_SIZE: u32 = 640;
/// Largest letterbox side accepted from callers
pub const MAX_IMAGE_SIZE: u32 = 4096;
/// Downsampling factor of YOLO detection heads; input sides must be multiples of it
pub const MODEL_STRIDE: u32 = 32;

/// Rounds `size` up to the next multiple of `stride`.
pub fn align_to_stride(size: u32, stride: u32) -> u32 {
    let stride = stride.max(1);
    size.max(1).div_ceil(stride).saturating_mul(stride)
}

/// Thresholds and input size for one detection call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub confidence: f32,
    pub iou: f32,
    pub image_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
            image_size: DEFAULT_IMAGE_SIZE,
        }
    }
}

/// One object reported by a backend, in pixel space of the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub xyxy: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

pub struct InferenceOutput {
    /// `None` when the model produced no detection set at all
    pub boxes: Option<Vec<RawDetection>>,
}

impl InferenceOutput {
    pub fn empty() -> Self {
        Self { boxes: None }
    }

    pub fn len(&self) -> usize {
        self.boxes.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A loaded detection model.
///
/// Implementations are shared across request threads once loaded, so `detect`
/// takes `&self`; backends that need exclusive access to their runtime guard it
/// internally.
pub trait DetectionBackend: Send + Sync {
    fn load_model(path: &Path) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run detection on an RGB raster with the given thresholds
    fn detect(&self, image: &RgbImage, params: &DetectParams) -> anyhow::Result<InferenceOutput>;

    /// Class index to label table of the loaded model
    fn class_names(&self) -> &ClassNames;

    /// Input side the model will actually run at for a requested `image_size`.
    fn input_size(&self, requested: u32) -> u32 {
        align_to_stride(requested, MODEL_STRIDE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to_stride() {
        assert_eq!(align_to_stride(640, 32), 640);
        assert_eq!(align_to_stride(100, 32), 128);
        assert_eq!(align_to_stride(1, 32), 32);
        assert_eq!(align_to_stride(33, 32), 64);
        assert_eq!(align_to_stride(MAX_IMAGE_SIZE, MODEL_STRIDE), MAX_IMAGE_SIZE);
    }

    #[test]
    fn test_align_to_stride_degenerate_inputs() {
        assert_eq!(align_to_stride(0, 32), 32);
        assert_eq!(align_to_stride(100, 0), 100);
        assert_eq!(align_to_stride(u32::MAX, 32), u32::MAX);
    }
}
