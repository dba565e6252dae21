//! Caller-facing transfer events and the transfer-kind union.
//!
//! Each transfer kind carries the typed callback appropriate to its
//! caller-facing contract; routing an event is an exhaustive match, not a
//! downcast.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use barge_protocol::{PartNumber, RawTransferKind, TransferId, TransferProgress, UploadId};

use crate::error::TransferError;

/// Lifecycle events delivered through a transfer kind's callback.
///
/// `Completed` and `Failed` are delivered at most once per transfer; the
/// absence of further events after either marks the end of the transfer's
/// lifecycle.
#[derive(Debug, Clone)]
pub enum TransferEvent<T> {
    Initiated { transfer_id: TransferId },
    InProcess(TransferProgress),
    Completed(T),
    Failed(Arc<TransferError>),
}

/// Callback for download events; completion carries the local location.
pub type DownloadEventHandler = Arc<dyn Fn(TransferEvent<Option<PathBuf>>) + Send + Sync>;

/// Callback for simple upload events; completion carries the entity tag.
pub type UploadEventHandler = Arc<dyn Fn(TransferEvent<Option<String>>) + Send + Sync>;

/// Callback for multipart upload events.
pub type MultipartUploadEventHandler = Arc<dyn Fn(TransferEvent<()>) + Send + Sync>;

/// The kind of one transfer, with its event callback.
///
/// A multipart upload's parts are separate transfers tagged
/// `MultipartUploadPart`; they report through their parent session rather
/// than a callback of their own.
#[derive(Clone)]
pub enum TransferKind {
    Download {
        on_event: DownloadEventHandler,
    },
    Upload {
        on_event: UploadEventHandler,
    },
    MultipartUpload {
        on_event: MultipartUploadEventHandler,
    },
    MultipartUploadPart {
        upload_id: UploadId,
        part_number: PartNumber,
    },
}

impl TransferKind {
    /// Persistable tag of this kind.
    pub fn raw(&self) -> RawTransferKind {
        match self {
            TransferKind::Download { .. } => RawTransferKind::Download,
            TransferKind::Upload { .. } => RawTransferKind::Upload,
            TransferKind::MultipartUpload { .. } => RawTransferKind::MultipartUpload,
            TransferKind::MultipartUploadPart { .. } => RawTransferKind::MultipartUploadPart,
        }
    }

    /// Part number of a multipart-upload-part transfer.
    pub fn part_number(&self) -> Option<PartNumber> {
        match self {
            TransferKind::MultipartUploadPart { part_number, .. } => Some(*part_number),
            _ => None,
        }
    }

    /// Upload id of a multipart-upload-part transfer.
    pub fn upload_id(&self) -> Option<&UploadId> {
        match self {
            TransferKind::MultipartUploadPart { upload_id, .. } => Some(upload_id),
            _ => None,
        }
    }

    pub(crate) fn emit_initiated(&self, transfer_id: &TransferId) {
        let transfer_id = transfer_id.clone();
        match self {
            TransferKind::Download { on_event } => on_event(TransferEvent::Initiated { transfer_id }),
            TransferKind::Upload { on_event } => on_event(TransferEvent::Initiated { transfer_id }),
            TransferKind::MultipartUpload { on_event } => {
                on_event(TransferEvent::Initiated { transfer_id })
            }
            TransferKind::MultipartUploadPart { .. } => {}
        }
    }

    pub(crate) fn emit_progress(&self, progress: TransferProgress) {
        match self {
            TransferKind::Download { on_event } => on_event(TransferEvent::InProcess(progress)),
            TransferKind::Upload { on_event } => on_event(TransferEvent::InProcess(progress)),
            TransferKind::MultipartUpload { on_event } => {
                on_event(TransferEvent::InProcess(progress))
            }
            TransferKind::MultipartUploadPart { .. } => {}
        }
    }

    pub(crate) fn emit_completed(&self, location: Option<PathBuf>, etag: Option<String>) {
        match self {
            TransferKind::Download { on_event } => on_event(TransferEvent::Completed(location)),
            TransferKind::Upload { on_event } => on_event(TransferEvent::Completed(etag)),
            TransferKind::MultipartUpload { on_event } => on_event(TransferEvent::Completed(())),
            TransferKind::MultipartUploadPart { .. } => {}
        }
    }

    pub(crate) fn emit_failed(&self, error: Arc<TransferError>) {
        match self {
            TransferKind::Download { on_event } => on_event(TransferEvent::Failed(error)),
            TransferKind::Upload { on_event } => on_event(TransferEvent::Failed(error)),
            TransferKind::MultipartUpload { on_event } => on_event(TransferEvent::Failed(error)),
            TransferKind::MultipartUploadPart { .. } => {}
        }
    }
}

impl fmt::Debug for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Download { .. } => f.write_str("Download"),
            TransferKind::Upload { .. } => f.write_str("Upload"),
            TransferKind::MultipartUpload { .. } => f.write_str("MultipartUpload"),
            TransferKind::MultipartUploadPart {
                upload_id,
                part_number,
            } => f
                .debug_struct("MultipartUploadPart")
                .field("upload_id", upload_id)
                .field("part_number", part_number)
                .finish(),
        }
    }
}
