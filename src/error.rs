//! Error types for Deviation Flux

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while tracking, fusing, or persisting deviation state
#[derive(Debug, Error)]
pub enum DeviationError {
    #[error("Missing required field `{field}` for user {user_id} (day {day})")]
    MissingPrecondition {
        user_id: String,
        day: String,
        field: String,
    },

    #[error("Non-finite value {value} for `{field}` (user {user_id}, day {day})")]
    NonFiniteFeature {
        user_id: String,
        day: String,
        field: String,
        value: f64,
    },

    #[error("Invalid tracker state for user {user_id}: {reason}")]
    InvalidState { user_id: String, reason: String },

    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Global model error: {0}")]
    Model(String),

    #[error("Invalid account age: {0}")]
    AccountAge(String),
}

impl DeviationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeviationError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_state(user_id: &str, reason: impl Into<String>) -> Self {
        DeviationError::InvalidState {
            user_id: user_id.to_string(),
            reason: reason.into(),
        }
    }
}
