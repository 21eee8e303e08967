//! Error types for the shared wire model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// Language tag was empty after normalization.
    #[error("Invalid language tag: {0:?}")]
    InvalidLanguage(String),
}

/// JSON body returned by both services for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable tag such as `validation_error`.
    pub error: String,
    /// Human readable detail.
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}
