use crate::error::ApiError;
use crate::state::AppState;
use crate::training::MetricsSummary;
use axum::{
    Json,
    body::Bytes,
    extract::{
        Multipart, Query, State,
        multipart::MultipartRejection,
        rejection::QueryRejection,
    },
};
use inference::{
    DetectParams, Detection, DetectionBackend, format_detections,
    backend::{DEFAULT_CONFIDENCE, DEFAULT_IMAGE_SIZE, DEFAULT_IOU, MAX_IMAGE_SIZE},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Multipart field carrying the image
const FILE_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    MissingModel,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub model: String,
}

/// Reports whether the model file is on disk without loading it.
#[tracing::instrument(skip_all)]
pub async fn health<B: DetectionBackend + 'static>(
    State(state): State<AppState<B>>,
) -> Json<HealthResponse> {
    let path = state.model.model_path();
    let present = tokio::fs::try_exists(path).await.unwrap_or(false);

    Json(HealthResponse {
        status: if present {
            HealthStatus::Ok
        } else {
            HealthStatus::MissingModel
        },
        model: path.display().to_string(),
    })
}

#[tracing::instrument(skip_all)]
pub async fn training_metrics<B: DetectionBackend + 'static>(
    State(state): State<AppState<B>>,
) -> Result<Json<MetricsSummary>, ApiError> {
    let loader = state.training.clone();
    let summary = tokio::task::spawn_blocking(move || loader.load())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(summary))
}

/// Raw query values, parsed by hand so malformed numbers map to one error.
#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    pub conf: Option<String>,
    pub iou: Option<String>,
    pub imgsz: Option<String>,
}

impl PredictQuery {
    /// Applies defaults and rejects unparseable or non-finite values, and sizes
    /// outside `1..=MAX_IMAGE_SIZE`.
    pub fn resolve(&self) -> Result<DetectParams, ApiError> {
        Ok(DetectParams {
            confidence: parse_threshold(self.conf.as_deref(), DEFAULT_CONFIDENCE)?,
            iou: parse_threshold(self.iou.as_deref(), DEFAULT_IOU)?,
            image_size: match self.imgsz.as_deref() {
                None => DEFAULT_IMAGE_SIZE,
                Some(raw) => match raw.trim().parse::<u32>() {
                    Ok(size) if (1..=MAX_IMAGE_SIZE).contains(&size) => size,
                    _ => return Err(ApiError::InvalidParams),
                },
            },
        })
    }
}

fn parse_threshold(raw: Option<&str>, default: f32) -> Result<f32, ApiError> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<f32>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(ApiError::InvalidParams),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct EchoParams {
    pub conf: f32,
    pub iou: f32,
    pub imgsz: u32,
}

impl From<&DetectParams> for EchoParams {
    fn from(params: &DetectParams) -> Self {
        Self {
            conf: params.confidence,
            iou: params.iou,
            imgsz: params.image_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    /// Thresholds and the input size the model actually ran at
    pub params: EchoParams,
    pub detections: Vec<Detection>,
    /// Wall-clock time of the model call, two decimals
    pub inference_ms: f64,
}

#[tracing::instrument(skip_all)]
pub async fn predict<B: DetectionBackend + 'static>(
    State(state): State<AppState<B>>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let start = Instant::now();

    match run_prediction(&state, query, multipart).await {
        Ok(response) => {
            state
                .metrics
                .record_success(response.detections.len(), start.elapsed());
            tracing::info!(
                detections = response.detections.len(),
                inference_ms = response.inference_ms,
                imgsz = response.params.imgsz,
                "Prediction served"
            );
            Ok(Json(response))
        }
        Err(e) => {
            state.metrics.record_failure(&e);
            Err(e)
        }
    }
}

async fn run_prediction<B: DetectionBackend + 'static>(
    state: &AppState<B>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<PredictResponse, ApiError> {
    let params = match query {
        Ok(Query(query)) => query.resolve()?,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Malformed query string");
            return Err(ApiError::InvalidParams);
        }
    };

    let upload = read_file_field(multipart).await?;
    tracing::debug!(bytes = upload.len(), "Received image upload");

    let model = state.model.clone();

    tokio::task::spawn_blocking(move || {
        let image = {
            let _s = common::span!("decode_image");
            image::load_from_memory(&upload)
                .map_err(|e| {
                    tracing::debug!(error = %e, "Image decode failed");
                    ApiError::UnreadableImage
                })?
                .to_rgb8()
        };
        drop(upload);

        let detector = model.get_model().map_err(ApiError::Model)?;
        let params = DetectParams {
            image_size: detector.input_size(params.image_size),
            ..params
        };

        let start = Instant::now();
        let output = detector
            .detect(&image, &params)
            .map_err(ApiError::Model)?;
        let elapsed = start.elapsed();

        Ok(PredictResponse {
            params: EchoParams::from(&params),
            detections: format_detections(&output, detector.class_names()),
            inference_ms: round_millis(elapsed.as_secs_f64() * 1000.0),
        })
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
}

/// Returns the bytes of the first `file` field.
async fn read_file_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, ApiError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Request body is not multipart");
            return Err(ApiError::MissingFile);
        }
    };

    loop {
        let field = multipart.next_field().await.map_err(|e| ApiError::Upload {
            status: e.status(),
            message: e.body_text(),
        })?;

        let Some(field) = field else {
            return Err(ApiError::MissingFile);
        };

        if field.name() == Some(FILE_FIELD) {
            return field.bytes().await.map_err(|e| ApiError::Upload {
                status: e.status(),
                message: e.body_text(),
            });
        }
    }
}

fn round_millis(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
