use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HandleId, PartNumber, RawTransferKind, TransferId, UploadId};

/// Reference to the local source file of an upload.
///
/// `temporary` marks a copy owned by the engine that must be cleaned up
/// once the transfer reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    #[serde(default)]
    pub temporary: bool,
}

/// Snapshot of one upload part's progress, persisted on the multipart
/// parent descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSnapshot {
    pub part_number: PartNumber,
    pub bytes: u64,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<HandleId>,
}

/// Flattened, serializable copy of one transfer's identity and progress.
///
/// Written as `<transferId>.json` on every state-changing operation and
/// deleted on terminal completion, cancellation or irrecoverable error.
/// The live event callback is intentionally absent — it is re-attached
/// during recovery from the raw `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    pub transfer_id: TransferId,
    pub kind: RawTransferKind,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,
    /// Local destination of a download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<UploadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<PartNumber>,
    /// Transport handle identifier at the time of persistence; used to
    /// re-link the descriptor to a live handle during recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<HandleId>,
    /// Byte count of this part (part transfers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_transferred: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Source file of a multipart upload (parent transfers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file: Option<UploadFileDescriptor>,
    /// Chosen part size in bytes (parent transfers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    /// Per-part progress snapshot (parent transfers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<PartSnapshot>>,
    pub updated_at: DateTime<Utc>,
}

impl TransferDescriptor {
    /// File name of this descriptor within the database directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.transfer_id)
    }

    /// Returns `true` if this descriptor is the parent of a multipart
    /// upload (carries the upload id but no part number).
    pub fn is_multipart_parent(&self) -> bool {
        self.kind == RawTransferKind::MultipartUpload
            && self.upload_id.is_some()
            && self.part_number.is_none()
    }

    /// Returns `true` if this descriptor is one part of a multipart upload.
    pub fn is_multipart_part(&self) -> bool {
        self.kind == RawTransferKind::MultipartUploadPart && self.part_number.is_some()
    }
}
