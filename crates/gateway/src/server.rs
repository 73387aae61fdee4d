use crate::config::GatewayConfig;
use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use inference::DetectionBackend;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

pub fn build_router<B: DetectionBackend + 'static>(
    state: AppState<B>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<B>))
        .route("/training/metrics", get(handlers::training_metrics::<B>))
        .route("/predict", post(handlers::predict::<B>))
        // Uploads are bounded by the tower-http limit below instead of axum's 2 MiB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server<B: DetectionBackend + 'static>(
    config: &GatewayConfig,
    state: AppState<B>,
) -> anyhow::Result<()> {
    let app = build_router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("HTTP server listening on {}", config.addr);
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /training/metrics");
    tracing::info!("  POST /predict?conf=&iou=&imgsz=  (multipart field `file`)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
