//! Error types for the editor

use pagecraft_model::InvariantViolation;
use pagecraft_sync::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Template violates tree invariants: {0}")]
    InvalidTemplate(#[from] InvariantViolation),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Preview protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Edit session requires a running tokio runtime")]
    NoRuntime,
}

/// Failure reported by the persistence collaborator
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Node not found in store: {0}")]
    NotFound(String),

    #[error("Store rejected {node_id}: {reason}")]
    Rejected { node_id: String, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
