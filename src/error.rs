//! Error types for the import pipeline and the query surface.
//!
//! Per-file read failures, unknown tables and unparsable stop times are not
//! errors here: they are logged and recovered where they happen.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

/// The archive itself could not be opened or unpacked. Fatal to an import.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to read archive: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("extraction worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A batch insert failed. The enclosing transaction has been rolled back.
    #[error("failed to write table {table}: {source}")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("failed to prepare storage file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Missing {0} parameter")]
    MissingParameter(&'static str),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ResponseError for QueryError {
    fn status_code(&self) -> StatusCode {
        match self {
            QueryError::MissingParameter(_) | QueryError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            QueryError::NotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            QueryError::Storage(e) => {
                error!(error = %e, "Query failed");
                "An error occurred while processing the request".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody { error: &message })
    }
}
