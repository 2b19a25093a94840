//! Error types for the model

use thiserror::Error;

use crate::InvariantViolation;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}
