use crate::db::errors::DbError;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The pricing page could not be fetched (network error or non-success status)
    #[error("Pricing source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// The pricing page no longer has the table layout we know how to read
    #[error("Pricing table schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    /// Model output was not parseable JSON
    #[error("Malformed model output: {message}")]
    MalformedOutput { message: String },

    /// Model output parsed, but required fields are missing or out of range
    #[error("Invalid analysis: {message}")]
    ValidationFailure { message: String },

    /// The language model call itself failed
    #[error("Language model request failed: {message}")]
    Llm { message: String, status: Option<u16> },

    /// Read/write against the persistence layer failed
    #[error(transparent)]
    Storage(#[from] DbError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Short, stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SourceUnavailable { .. } => "source_unavailable",
            Error::SchemaMismatch { .. } => "schema_mismatch",
            Error::MalformedOutput { .. } => "malformed_output",
            Error::ValidationFailure { .. } => "validation_failure",
            Error::Llm { .. } => "llm",
            Error::Storage(_) => "storage",
            Error::Internal { .. } => "internal",
            Error::Other(_) => "other",
        }
    }

    /// Whether this failure belongs to a single session's unit of work.
    ///
    /// Unit failures are logged and the session is skipped until the next run; everything else
    /// ends the run.
    pub fn is_unit_failure(&self) -> bool {
        matches!(
            self,
            Error::MalformedOutput { .. } | Error::ValidationFailure { .. } | Error::Llm { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.into())
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
