//! Error types for taxplan-crm

use thiserror::Error;

/// Message shown for any portal token that does not grant access.
///
/// Unknown and expired tokens share it so callers cannot tell which tokens exist.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired access link";

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    #[error("{}", INVALID_TOKEN_MESSAGE)]
    InvalidToken,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mail delivery error: {0}")]
    Mail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrmError {
    /// Wrap a rusqlite error with the operation that produced it
    pub fn db(context: &str, err: rusqlite::Error) -> Self {
        CrmError::Database(format!("{}: {}", context, err))
    }
}
