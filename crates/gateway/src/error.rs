use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of an HTTP request, rendered as `{"error": "<message>"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid query params")]
    InvalidParams,

    #[error("missing file")]
    MissingFile,

    #[error("could not read image")]
    UnreadableImage,

    #[error("{message}")]
    Upload { status: StatusCode, message: String },

    #[error("model failure: {0:#}")]
    Model(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidParams | ApiError::MissingFile | ApiError::UnreadableImage => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Upload { status, .. } => *status,
            ApiError::Model(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly tag, used as a metric attribute
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::InvalidParams => "invalid_params",
            ApiError::MissingFile => "missing_file",
            ApiError::UnreadableImage => "unreadable_image",
            ApiError::Upload { .. } => "upload",
            ApiError::Model(_) => "model",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, %status, "Request failed");
        } else {
            tracing::warn!(error = %self, %status, "Request rejected");
        }

        let body = serde_json::json!({ "error": self.to_string() });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(ApiError::InvalidParams.to_string(), "invalid query params");
        assert_eq!(ApiError::MissingFile.to_string(), "missing file");
        assert_eq!(ApiError::UnreadableImage.to_string(), "could not read image");

        let err = ApiError::Model(anyhow::anyhow!("no such file").context("loading best.onnx"));
        assert_eq!(err.to_string(), "model failure: loading best.onnx: no such file");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::InvalidParams.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::UnreadableImage.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Model(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Upload {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                message: "too big".to_string(),
            }
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[tokio::test]
    async fn test_response_body_is_error_object() {
        let response = ApiError::MissingFile.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "missing file" }));
    }
}
