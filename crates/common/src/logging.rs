use crate::config::Environment;
use crate::telemetry::TelemetryGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
///
/// When a [`TelemetryGuard`] is supplied, spans are also bridged to its
/// OpenTelemetry tracer so they get exported over OTLP.
pub fn setup_logging(environment: Environment, telemetry: Option<&TelemetryGuard>) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let otel_layer = telemetry.map(|guard| tracing_opentelemetry::layer().with_tracer(guard.tracer()));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
