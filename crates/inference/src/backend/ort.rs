use super::{DetectParams, DetectionBackend, InferenceOutput, MODEL_STRIDE, align_to_stride};
use crate::classes::ClassNames;
use crate::processing::{post::PostProcessor, pre::PreProcessor};
use image::RgbImage;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Input tensor name of Ultralytics ONNX exports
const INPUT_NAME: &str = "images";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
}

impl ExecutionProvider {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "cuda" | "gpu" => ExecutionProvider::Cuda,
            _ => ExecutionProvider::Cpu,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrtOptions {
    pub provider: ExecutionProvider,
    /// Newline-separated labels; overrides the names embedded in the model
    pub class_names_path: Option<PathBuf>,
}

/// YOLO detector running on ONNX Runtime.
pub struct OrtBackend {
    session: Mutex<Session>,
    class_names: ClassNames,
    stride: u32,
    /// Side of a static-shape export; requests are forced to it
    fixed_size: Option<u32>,
}

/// Entries Ultralytics writes into the metadata of exported models
struct ExportMetadata {
    names: Option<String>,
    stride: u32,
    fixed_size: Option<u32>,
}

impl ExportMetadata {
    fn read(session: &Session) -> anyhow::Result<Self> {
        let metadata = session.metadata()?;
        let imgsz = metadata.custom("imgsz")?;
        let args = metadata.custom("args")?;

        Ok(Self {
            names: metadata.custom("names")?,
            stride: parse_stride(metadata.custom("stride")?.as_deref()),
            fixed_size: parse_fixed_size(imgsz.as_deref(), args.as_deref()),
        })
    }
}

impl OrtBackend {
    /// Load model with the given execution provider and label source
    pub fn load_model_with_options(path: &Path, options: &OrtOptions) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match options.provider {
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                // Registration failures fall back to CPU rather than aborting the load
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;
        let metadata = ExportMetadata::read(&session)?;

        let class_names = match (&options.class_names_path, metadata.names.as_deref()) {
            (Some(names_path), _) => ClassNames::from_file(names_path)?,
            (None, Some(raw)) => ClassNames::parse_metadata(raw)?,
            (None, None) => {
                tracing::warn!("Model metadata has no class names, labels will be class indices");
                ClassNames::default()
            }
        };

        tracing::info!(
            path = %path.display(),
            classes = class_names.len(),
            stride = metadata.stride,
            fixed_size = ?metadata.fixed_size,
            "Model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            class_names,
            stride: metadata.stride,
            fixed_size: metadata.fixed_size,
        })
    }

    /// Returns a loader bound to `options`, suitable for lazy model access.
    pub fn loader(options: OrtOptions) -> impl Fn(&Path) -> anyhow::Result<Self> + Send + Sync {
        move |path| Self::load_model_with_options(path, &options)
    }
}

/// Stride entry, e.g. `32`; falls back to the YOLO default.
fn parse_stride(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|stride| *stride > 0)
        .unwrap_or(MODEL_STRIDE)
}

/// Square input side of a static export, from `imgsz` (e.g. `[640, 640]`).
///
/// Exports are static unless `args` records `dynamic` as true. Rectangular
/// exports yield `None` since the letterbox is square.
fn parse_fixed_size(imgsz: Option<&str>, args: Option<&str>) -> Option<u32> {
    let dynamic = args.is_some_and(|args| {
        let args = args.replace(['\'', '"', ' '], "");
        args.contains("dynamic:True") || args.contains("dynamic:true")
    });
    if dynamic {
        return None;
    }

    let sides = imgsz?
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|side| side.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    let side = match sides.as_slice() {
        [first, rest @ ..] if rest.iter().all(|side| side == first) => Some(*first),
        _ => None,
    };
    side.filter(|side| *side > 0)
}

impl DetectionBackend for OrtBackend {
    fn load_model(path: &Path) -> anyhow::Result<Self> {
        Self::load_model_with_options(path, &OrtOptions::default())
    }

    fn detect(&self, image: &RgbImage, params: &DetectParams) -> anyhow::Result<InferenceOutput> {
        let input_size = self.input_size(params.image_size);
        let (input, transform) = PreProcessor::new(input_size).preprocess(image)?;
        let postprocessor = PostProcessor::new(params.confidence, params.iou);

        let mut session = self.session.lock();

        let outputs = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            session.run(ort::inputs![
                INPUT_NAME => TensorRef::from_array_view(input.view())?
            ])?
        };

        let predictions = outputs[0].try_extract_array::<f32>()?;
        let boxes = postprocessor.parse_detections(&predictions, &transform)?;

        Ok(InferenceOutput { boxes: Some(boxes) })
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn input_size(&self, requested: u32) -> u32 {
        match self.fixed_size {
            Some(size) => {
                if requested != size {
                    tracing::warn!(
                        requested,
                        size,
                        "Model has a fixed input size, ignoring requested imgsz"
                    );
                }
                size
            }
            None => align_to_stride(requested, self.stride),
        }
    }
}
