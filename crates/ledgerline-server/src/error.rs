//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{audit::AuditQueryError, data::DataError, db::DbError};

/// Errors surfaced at the HTTP boundary
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The actor could not be handed to the audit trigger
    #[error("Audit configuration failure: {0}")]
    AuditConfiguration(String),

    #[error("Failed to retrieve audit logs")]
    AuditRetrieval,

    #[error("Ledgerline error: {0}")]
    Ledgerline(#[from] ledgerline_common::LedgerlineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Config(ref message) => {
                tracing::error!("Configuration error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            },
            AppError::AuditConfiguration(ref reason) => {
                tracing::error!("Audit configuration failure: {}", reason);
                (StatusCode::INTERNAL_SERVER_ERROR, "Audit configuration failure".to_string())
            },
            AppError::AuditRetrieval => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve audit logs".to_string(),
            ),
            AppError::Ledgerline(ref e) => {
                tracing::error!("Ledgerline error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::AuditConfiguration { variable, reason } => {
                AppError::AuditConfiguration(format!("{variable}: {reason}"))
            },
            DataError::InvalidCall(message) => AppError::BadRequest(message),
            err @ DataError::NotFound { .. } => AppError::NotFound(err.to_string()),
            DataError::Database(e) => AppError::Database(e),
            DataError::Backend(message) => AppError::Internal(message),
        }
    }
}

impl From<AuditQueryError> for AppError {
    fn from(err: AuditQueryError) -> Self {
        match err {
            AuditQueryError::InvalidFilter(message) => AppError::BadRequest(message),
            AuditQueryError::Retrieval => AppError::AuditRetrieval,
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => AppError::Database(e),
            DbError::Config(message) => AppError::Config(message),
            DbError::Migration(e) => AppError::Internal(e.to_string()),
        }
    }
}
