pub mod accessor;
pub mod backend;
pub mod classes;
pub mod detection;
pub mod processing;

// Re-export commonly used types for convenience
pub use accessor::ModelAccessor;
pub use backend::{DetectParams, DetectionBackend, InferenceOutput, RawDetection};
pub use classes::ClassNames;
pub use detection::{Detection, format_detections};
