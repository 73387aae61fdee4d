pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod training;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use server::{build_router, run_server};
pub use state::AppState;
pub use training::{MetricsLoader, MetricsSource, MetricsSummary, load_training_metrics};
