use crate::backend::DetectionBackend;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

type Loader<B> = Box<dyn Fn(&Path) -> anyhow::Result<B> + Send + Sync>;

/// Loads the detection model on first use and hands out the same instance afterwards.
///
/// Construction is cheap and never touches the model file. A failed load is
/// not cached: the error goes to the caller and the next call loads again.
pub struct ModelAccessor<B> {
    model_path: PathBuf,
    loader: Loader<B>,
    model: OnceCell<Arc<B>>,
}

impl<B: DetectionBackend + 'static> ModelAccessor<B> {
    /// Accessor using the backend's default loading options
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self::with_loader(model_path, B::load_model)
    }

    pub fn with_loader<F>(model_path: impl Into<PathBuf>, loader: F) -> Self
    where
        F: Fn(&Path) -> anyhow::Result<B> + Send + Sync + 'static,
    {
        Self {
            model_path: model_path.into(),
            loader: Box::new(loader),
            model: OnceCell::new(),
        }
    }

    /// Returns the loaded model, loading it if this is the first call.
    ///
    /// Blocks for the duration of the load; call from a blocking context.
    pub fn get_model(&self) -> anyhow::Result<Arc<B>> {
        self.model
            .get_or_try_init(|| {
                tracing::info!(path = %self.model_path.display(), "Loading detection model");
                let start = Instant::now();

                let model = (self.loader)(&self.model_path).map_err(|e| {
                    tracing::error!(
                        path = %self.model_path.display(),
                        error = %e,
                        "Failed to load detection model"
                    );
                    e
                })?;

                tracing::info!(
                    model_load_duration_seconds = start.elapsed().as_secs_f64(),
                    "Detection model ready"
                );
                Ok::<_, anyhow::Error>(Arc::new(model))
            })
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}
