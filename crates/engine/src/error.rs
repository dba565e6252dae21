//! Engine error types.

use barge_protocol::PartNumber;
use barge_transfer::{MultipartError, PartError, SharedError};

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Part(#[from] PartError),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("part upload failed: {0}")]
    PartUpload(SharedError),

    #[error("operation requires a different transfer kind")]
    InvalidTransferKind,

    #[error("multipart upload state cannot be resumed")]
    NotResumable,

    #[error("part {part_number} failed after {attempts} attempts")]
    RetryLimitExceeded {
        part_number: PartNumber,
        attempts: u32,
    },

    #[error("background task failed: {0}")]
    Background(String),
}
