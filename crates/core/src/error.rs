//! Unified error types for the import pipeline.
//!
//! Error codes:
//! - FETCH_001: Source file could not be fetched
//! - PARSE_001: Source bytes are not a well-formed spreadsheet
//! - DB_001-002: Record store errors
//! - RUN_001-003: Run lookup and state errors
//! - VALID_001: Request validation errors
//! - AUTH_001: Missing owner identity

use thiserror::Error;
use uuid::Uuid;

use crate::run::{Attempt, RunStatus};

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Record store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorCode {
    /// DB_001: Store read or run update failed
    StoreFailed,
    /// DB_002: Store rejected a record batch
    WriteFailed,
}

impl DbErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreFailed => "DB_001",
            Self::WriteFailed => "DB_002",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        500
    }
}

/// Unified error type for the import pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Source unreachable, timed out, or too large.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Source bytes are not a spreadsheet of the declared format.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Record store error with code.
    #[error("[{code}] {message}")]
    Database { code: &'static str, message: String },

    /// The run does not exist or belongs to another owner.
    #[error("import run {0} not found")]
    NotFoundOrForbidden(Uuid),

    /// The run is not in a state that allows the requested transition.
    #[error("import run {id} is {status}; only failed runs can be retried")]
    InvalidState { id: Uuid, status: RunStatus },

    /// A newer attempt took over the run, or the run already settled.
    #[error("import attempt {0} is no longer active")]
    Superseded(Attempt),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a record store error.
    pub fn database(code: DbErrorCode, msg: impl Into<String>) -> Self {
        Self::Database {
            code: code.code(),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Fetch(_) => 502,
            Self::Parse(_) => 422,
            Self::Database { .. } => 500,
            Self::NotFoundOrForbidden(_) => 404,
            Self::InvalidState { .. } => 409,
            Self::Superseded(_) => 409,
            Self::Validation(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Internal(_) => 500,
        }
    }

    /// Get the stable error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "FETCH_001",
            Self::Parse(_) => "PARSE_001",
            Self::Database { code, .. } => *code,
            Self::NotFoundOrForbidden(_) => "RUN_001",
            Self::InvalidState { .. } => "RUN_002",
            Self::Superseded(_) => "RUN_003",
            Self::Validation(_) => "VALID_001",
            Self::Unauthorized(_) => "AUTH_001",
            Self::Internal(_) => "INTERNAL_001",
        }
    }
}
