//! Seams to the external transport layer and to persistence.
//!
//! The engine never performs byte transfer itself: an external transport
//! owns the low-level operations and reports back asynchronously. These
//! traits are what the hosting application implements to bridge the
//! engine to its transport, and what tests replace with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use barge_protocol::{HandleId, PartNumber, UploadId};
use barge_transfer::UploadFile;

use crate::error::TransferError;
use crate::session::MultipartUploadSession;
use crate::task::TransferTask;

/// One live low-level transfer operation owned by the transport layer.
///
/// Control calls are fire-and-forget; outcomes arrive through the
/// transport's own callbacks.
pub trait TransportHandle: Send + Sync {
    /// Stable per-process identifier for this handle.
    fn id(&self) -> HandleId;

    fn resume(&self);

    fn suspend(&self);

    fn cancel(&self);
}

/// Future returned by [`TransportLister::active_handles`].
pub type ActiveHandlesFuture<'a> =
    Pin<Box<dyn Future<Output = Vec<Arc<dyn TransportHandle>>> + Send + 'a>>;

/// Enumerates the transport layer's currently active handles.
///
/// Used once, at recovery time, to re-link persisted descriptors to the
/// operations that survived the process restart.
pub trait TransportLister: Send + Sync {
    fn active_handles(&self) -> ActiveHandlesFuture<'_>;
}

/// One part upload for the transport layer to perform.
#[derive(Debug, Clone)]
pub struct PartUploadRequest {
    pub upload_id: UploadId,
    pub part_number: PartNumber,
    pub file: UploadFile,
    /// Byte offset of this part within the source file.
    pub offset: u64,
    /// Byte count of this part.
    pub bytes: u64,
}

/// Remote multipart-upload operations.
///
/// Calls return synchronously once the work is accepted; results are
/// reported back into the session's event handlers, possibly from another
/// thread. A call that cannot even be accepted returns an error, which
/// the session routes through its failure path.
pub trait MultipartUploadClient: Send + Sync {
    /// Creates the remote multipart upload. The client reports the
    /// assigned upload id via
    /// [`MultipartUploadSession::handle_upload_event`].
    fn create_upload(&self, session: Arc<MultipartUploadSession>) -> Result<(), TransferError>;

    /// Uploads one part. The client reports `Started`, progress and the
    /// terminal outcome via
    /// [`MultipartUploadSession::handle_part_event`].
    fn upload_part(
        &self,
        session: Arc<MultipartUploadSession>,
        request: PartUploadRequest,
        sub_task: Arc<TransferTask>,
    ) -> Result<(), TransferError>;

    /// Completes the remote upload once every part has an entity tag.
    /// The client confirms via a `Completed` upload event.
    fn complete_upload(
        &self,
        session: Arc<MultipartUploadSession>,
        upload_id: &UploadId,
    ) -> Result<(), TransferError>;

    /// Aborts the remote upload. The client confirms via an `Aborted`
    /// upload event.
    fn abort_upload(
        &self,
        session: Arc<MultipartUploadSession>,
        upload_id: &UploadId,
    ) -> Result<(), TransferError>;

    /// Cancels the transport operations of in-flight parts.
    fn cancel_part_uploads(&self, handle_ids: &[HandleId]);
}

/// Extracts the entity tag from a completed operation's response headers.
///
/// The only wire-level detail the engine interprets: object stores quote
/// the tag and header names vary in case.
pub fn etag_from_headers<'a, I>(headers: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("etag"))
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Persistence seam implemented by the transfer database.
///
/// Tasks hold this weakly so they can persist their own transitions
/// without keeping the database alive, and so tests can substitute a
/// recording mock.
pub trait TransferStore: Send + Sync {
    fn insert(&self, task: &Arc<TransferTask>) -> Result<(), TransferError>;

    fn update(&self, task: &Arc<TransferTask>) -> Result<(), TransferError>;

    fn remove(&self, task: &TransferTask) -> Result<(), TransferError>;
}
