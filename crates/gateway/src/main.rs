use common::TelemetryGuard;
use gateway::{
    AppState, GatewayConfig, MetricsLoader, logging::setup_logging, run_server,
};
use inference::{
    ModelAccessor,
    backend::ort::{OrtBackend, OrtOptions},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    let telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("gateway", endpoint))
        .transpose()?;

    setup_logging(&config, telemetry.as_ref());

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    // Loaded on the first prediction, not here
    let model = ModelAccessor::with_loader(
        &config.model_path,
        OrtBackend::loader(OrtOptions {
            provider: config.execution_provider,
            class_names_path: config.class_names_path.clone(),
        }),
    );

    if !config.model_path.exists() {
        tracing::warn!(
            path = %config.model_path.display(),
            "Model file not found, /predict will fail until it is in place"
        );
    }

    let training = MetricsLoader::from_paths(&config.metrics_json, &config.results_csv);

    let state = AppState::new(model, training);
    run_server(&config, state).await
}
