use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised while talking to an extraction backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },

    #[error("backend not configured: {message}")]
    NotConfigured { message: String },
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Document validation and reading errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("unsupported file type. file must be PDF not {extension}")]
    UnsupportedFormat { extension: String },

    #[error("failed to read file contents: {0}")]
    Read(std::io::Error),

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
}

/// API error response (matches Axum's built-in JsonRejection format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServiceError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Processing(ProcessingError::Read(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Backend(BackendError::Connection { .. })
            | ServiceError::Backend(BackendError::Api { .. })
            | ServiceError::Backend(BackendError::InvalidResponse { .. })
            | ServiceError::Backend(BackendError::EmbeddingDimension { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn error_code(&self) -> &'static str {
        match self {
            ServiceError::JobNotFound { .. } => "job_not_found",
            ServiceError::Backend(BackendError::Connection { .. }) => "backend_connection",
            ServiceError::Backend(BackendError::Api { .. }) => "backend_request_failed",
            ServiceError::Backend(BackendError::InvalidResponse { .. }) => {
                "backend_invalid_response"
            }
            ServiceError::Backend(BackendError::EmbeddingDimension { .. }) => {
                "embedding_dimension_mismatch"
            }
            ServiceError::Backend(BackendError::NotConfigured { .. }) => "backend_not_configured",
            ServiceError::Database(_) => "database_error",
            ServiceError::Processing(ProcessingError::UnsupportedFormat { .. }) => {
                "unsupported_format"
            }
            ServiceError::Processing(ProcessingError::Read(_)) => "read_error",
            ServiceError::Processing(ProcessingError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Config { .. } => "config_error",
            ServiceError::ShuttingDown => "shutting_down",
            ServiceError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(code),
            details: None,
        };

        (status, Json(response)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message() {
        let err = ServiceError::from(ProcessingError::UnsupportedFormat {
            extension: ".png".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "unsupported file type. file must be PDF not .png"
        );
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.error_code(), "unsupported_format");
    }

    #[test]
    fn test_not_found_status() {
        let err = ServiceError::JobNotFound {
            job_id: "abc".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Job not found: abc");
    }

    #[test]
    fn test_backend_errors_map_to_bad_gateway() {
        let err = ServiceError::from(BackendError::Api {
            status: 429,
            message: "rate limited".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "request failed (status 429): rate limited");
    }

    #[test]
    fn test_database_error_names_cause() {
        let err = ServiceError::from(DatabaseError::Migration {
            message: "schema version 9 is newer than supported".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Database error: Migration failed: schema version 9 is newer than supported"
        );

        let err = ServiceError::from(DatabaseError::Query(rusqlite::Error::QueryReturnedNoRows));
        assert!(err.to_string().starts_with("Database error: Query failed: "));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
