use crate::telemetry::PredictMetrics;
use crate::training::MetricsLoader;
use inference::ModelAccessor;
use std::sync::Arc;

/// Shared, read-only handles injected into every handler.
pub struct AppState<B> {
    pub model: Arc<ModelAccessor<B>>,
    pub training: Arc<MetricsLoader>,
    pub metrics: PredictMetrics,
}

impl<B> AppState<B> {
    pub fn new(model: ModelAccessor<B>, training: MetricsLoader) -> Self {
        Self {
            model: Arc::new(model),
            training: Arc::new(training),
            metrics: PredictMetrics::new("gateway"),
        }
    }
}

// Manual impl: deriving would require `B: Clone`
impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            training: self.training.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
