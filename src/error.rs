//! Crate-wide error taxonomy.
//!
//! Mirrors the admission-layer error codes a caller can see
//! (`InvalidRequest`, `Unauthorized`, `NotFound`, `Conflict`, `Transient`)
//! plus the orchestrator-internal kinds that never cross that boundary
//! (`ProviderFailure`, `StageFailure`, `Cancelled`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A single streaming provider call failed or timed out. Handled
    /// locally by degrading that participant's contribution; never
    /// surfaced to the admission caller.
    #[error("provider failure for {model_id}: {reason}")]
    ProviderFailure { model_id: String, reason: String },

    /// Every participant failed in a stage, or synthesis failed.
    /// Terminal: the session transitions to `Failed`.
    #[error("stage failure: {0}")]
    StageFailure(String),

    /// I/O fault against the store. The current transaction is aborted
    /// and the orchestrator transitions to `Failed`.
    #[error("transient store failure: {0}")]
    Transient(#[from] rusqlite::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// The code name reported at the admission boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::Unauthorized => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::ProviderFailure { .. } => "ProviderFailure",
            AppError::StageFailure(_) => "StageFailure",
            AppError::Transient(_) => "Transient",
            AppError::Serialization(_) => "Transient",
            AppError::Cancelled => "Cancelled",
            AppError::Other(_) => "Transient",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Cancelled => StatusCode::GONE,
            AppError::ProviderFailure { .. } | AppError::StageFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Transient(_) | AppError::Other(_) | AppError::Serialization(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
