use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inflow_pipeline::PipelineError;
use serde_json::json;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Failed to bind to port {0}. (Error: {1})")]
    PortBindingFailed(u16, std::io::Error),

    #[error("Server crashed. (Error: {0})")]
    ServerCrashed(std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidInput(#[from] inflow_common::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Background task failed. (Error: {0})")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(
                PipelineError::ProviderUnavailable(_) | PipelineError::CacheUnavailable { .. },
            ) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
