use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Process is already running")]
    AlreadyRunning,

    #[error("Process not found")]
    ProcessNotFound,

    #[error("Failed to start process: {0}")]
    SpawnError(String),

    #[error("Failed to stop process: {0}")]
    SignalError(String),

    #[error("Log file not found")]
    LogNotFound,

    #[error("Failed to read console log")]
    LogReadError,

    #[error("Command blocked: {0}")]
    CommandBlocked(String),

    #[error("Command execution error: {0}")]
    CommandExecutionError(String),

    #[error("Operation timed out: {0}")]
    TimeoutError(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingField(_)
            | AppError::AlreadyRunning
            | AppError::CommandBlocked(_) => StatusCode::BAD_REQUEST,
            AppError::ProcessNotFound | AppError::LogNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Dashboard clients only read a human-readable `error` field from failed
// responses, so every variant flattens to `{"error": "..."}`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
