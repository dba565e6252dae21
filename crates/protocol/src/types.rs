use serde::{Deserialize, Serialize};

/// Unique identifier of one transfer; primary key for persistence and
/// live-task lookup.
pub type TransferId = String;

/// Remote identifier of a multipart upload, assigned by the object store.
pub type UploadId = String;

/// 1-based number of a part within a multipart upload.
pub type PartNumber = u32;

/// Stable per-process identifier of a low-level transport handle.
pub type HandleId = u64;

/// Raw tag identifying the kind of a persisted transfer.
///
/// Stored as an integer in descriptor documents; the live engine carries
/// the full kind (with its event callback) which cannot be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RawTransferKind {
    Download = 0,
    Upload = 1,
    MultipartUpload = 2,
    MultipartUploadPart = 3,
}

impl From<RawTransferKind> for u8 {
    fn from(kind: RawTransferKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for RawTransferKind {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(RawTransferKind::Download),
            1 => Ok(RawTransferKind::Upload),
            2 => Ok(RawTransferKind::MultipartUpload),
            3 => Ok(RawTransferKind::MultipartUploadPart),
            other => Err(format!("invalid transfer kind tag: {other}")),
        }
    }
}

/// Lifecycle status of one transfer.
///
/// `Completed`, `Cancelled` and `Error` are terminal; a task never leaves
/// a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "error")]
    Error,
}

impl TransferStatus {
    /// Returns `true` for statuses that permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Cancelled | TransferStatus::Error
        )
    }
}

/// Byte-level progress of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl TransferProgress {
    /// Fraction of the transfer completed, in `[0.0, 1.0]`.
    ///
    /// A zero-byte transfer reports 0.0 until explicitly completed.
    pub fn fraction_completed(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64).min(1.0)
    }
}
