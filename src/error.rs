use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::events::hub::BroadcastError;

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";
const PG_NOT_NULL_VIOLATION: &str = "23502";
const PG_CHECK_VIOLATION: &str = "23514";

pub type AppResult<T> = Result<T, AppError>;

/// Outward-facing classification of every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    AlreadyExists,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("image storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Database(_) | Self::Storage(_) | Self::Broadcast(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Storage errors are translated here so no raw driver error leaves the
/// repository layer with a caller-attributable cause.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = e {
            return Self::NotFound("resource not found".into());
        }
        if let sqlx::Error::Database(db) = &e {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            match db.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => {
                    return Self::AlreadyExists(format!("duplicate value violates {constraint}"))
                }
                Some(PG_FOREIGN_KEY_VIOLATION) => {
                    return Self::Validation(format!(
                        "referenced record does not exist ({constraint})"
                    ))
                }
                Some(PG_CHECK_VIOLATION) => {
                    return Self::Validation(format!("value violates {constraint}"))
                }
                Some(PG_NOT_NULL_VIOLATION) => {
                    return Self::Validation("required field missing".into())
                }
                _ => {}
            }
        }
        Self::Database(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.kind() {
            ErrorKind::Internal => {
                error!(error = %self, "internal error");
                "Internal Server Error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
