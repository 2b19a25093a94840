//! Error types for the synchronization channel

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The receiving surface is not attached yet (or is reloading)
    #[error("Preview endpoint unreachable")]
    Unreachable,

    #[error("Preview channel closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
