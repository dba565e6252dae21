//! The live identity of one transfer.
//!
//! A task is a thin status state machine over a transport handle (simple
//! transfers) or a proxy session (multipart uploads), delegating events
//! to its kind's callback and persisting every transition through the
//! transfer store. Control calls in a status that does not permit them
//! are logged and ignored so that redundant or late-arriving calls cannot
//! corrupt state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use barge_protocol::{
    HandleId, PartNumber, TransferDescriptor, TransferId, TransferProgress, TransferStatus,
    UploadFileDescriptor, UploadId,
};
use barge_transfer::{MultipartUpload, UploadPart};

use crate::error::TransferError;
use crate::events::TransferKind;
use crate::transport::{TransferStore, TransportHandle};

/// A task standing in for the transport handle of a compound transfer.
///
/// A multipart upload session implements this so that control calls on
/// the parent task fan out to the session's own machinery.
pub trait TransferProxy: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn cancel(&self);
}

/// Optional request attributes of a transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Local destination of a download.
    pub location: Option<PathBuf>,
    pub content_type: Option<String>,
    pub request_headers: HashMap<String, String>,
}

/// The live, shared handle for one transfer.
pub struct TransferTask {
    transfer_id: TransferId,
    kind: TransferKind,
    bucket: String,
    key: String,
    options: TransferOptions,
    store: Weak<dyn TransferStore>,
    inner: Mutex<TaskInner>,
}

struct TaskInner {
    status: TransferStatus,
    handle: Option<Arc<dyn TransportHandle>>,
    proxy: Option<Arc<dyn TransferProxy>>,
    upload_id: Option<UploadId>,
    etag: Option<String>,
    multipart: Option<MultipartUpload>,
    upload_part: Option<UploadPart>,
}

impl TransferTask {
    /// Creates a task with a generated transfer id.
    pub fn new(
        kind: TransferKind,
        bucket: impl Into<String>,
        key: impl Into<String>,
        options: TransferOptions,
        store: Weak<dyn TransferStore>,
    ) -> Arc<Self> {
        Self::with_id(Uuid::new_v4().to_string(), kind, bucket, key, options, store)
    }

    /// Creates a task with an explicit transfer id.
    pub fn with_id(
        transfer_id: TransferId,
        kind: TransferKind,
        bucket: impl Into<String>,
        key: impl Into<String>,
        options: TransferOptions,
        store: Weak<dyn TransferStore>,
    ) -> Arc<Self> {
        let upload_id = kind.upload_id().cloned();
        Arc::new(Self {
            transfer_id,
            kind,
            bucket: bucket.into(),
            key: key.into(),
            options,
            store,
            inner: Mutex::new(TaskInner {
                status: TransferStatus::Unknown,
                handle: None,
                proxy: None,
                upload_id,
                etag: None,
                multipart: None,
                upload_part: None,
            }),
        })
    }

    /// Rebuilds a task from a persisted descriptor, optionally re-linked
    /// to a surviving transport handle.
    ///
    /// A task recovered with a live handle starts out paused, waiting for
    /// an explicit `resume`.
    pub fn from_descriptor(
        descriptor: &TransferDescriptor,
        kind: TransferKind,
        handle: Option<Arc<dyn TransportHandle>>,
        store: Weak<dyn TransferStore>,
    ) -> Arc<Self> {
        let status = if handle.is_some() {
            TransferStatus::Paused
        } else {
            TransferStatus::Unknown
        };
        Arc::new(Self {
            transfer_id: descriptor.transfer_id.clone(),
            kind,
            bucket: descriptor.bucket.clone(),
            key: descriptor.key.clone(),
            options: TransferOptions {
                location: descriptor.location.clone(),
                content_type: descriptor.content_type.clone(),
                request_headers: descriptor.request_headers.clone(),
            },
            store,
            inner: Mutex::new(TaskInner {
                status,
                handle,
                proxy: None,
                upload_id: descriptor.upload_id.clone(),
                etag: descriptor.etag.clone(),
                multipart: None,
                upload_part: None,
            }),
        })
    }

    pub fn transfer_id(&self) -> &TransferId {
        &self.transfer_id
    }

    pub fn kind(&self) -> &TransferKind {
        &self.kind
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> TransferStatus {
        self.inner.lock().unwrap().status
    }

    pub fn part_number(&self) -> Option<PartNumber> {
        self.kind.part_number()
    }

    pub fn upload_id(&self) -> Option<UploadId> {
        self.inner.lock().unwrap().upload_id.clone()
    }

    pub fn etag(&self) -> Option<String> {
        self.inner.lock().unwrap().etag.clone()
    }

    /// Transport handle identifier, from the attached handle or, for
    /// parts, from the in-progress part state.
    pub fn handle_id(&self) -> Option<HandleId> {
        let inner = self.inner.lock().unwrap();
        inner
            .handle
            .as_ref()
            .map(|handle| handle.id())
            .or_else(|| inner.upload_part.as_ref().and_then(UploadPart::handle_id))
    }

    /// Attaches the live transport handle performing this transfer.
    pub fn set_handle(&self, handle: Arc<dyn TransportHandle>) {
        self.inner.lock().unwrap().handle = Some(handle);
    }

    /// Attaches the session driving this transfer.
    pub fn set_proxy(&self, proxy: Arc<dyn TransferProxy>) {
        self.inner.lock().unwrap().proxy = Some(proxy);
    }

    pub fn set_upload_id(&self, upload_id: UploadId) {
        self.inner.lock().unwrap().upload_id = Some(upload_id);
    }

    /// Records the entity tag returned by the remote store.
    pub fn record_etag(&self, etag: impl Into<String>) {
        self.inner.lock().unwrap().etag = Some(etag.into());
    }

    /// Updates the persisted multipart aggregate snapshot.
    pub fn set_multipart(self: &Arc<Self>, multipart: MultipartUpload) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(upload_id) = multipart.upload_id() {
                inner.upload_id = Some(upload_id.clone());
            }
            inner.multipart = Some(multipart);
        }
        self.persist_update();
    }

    /// Updates the persisted part state of a part transfer.
    pub fn set_upload_part(self: &Arc<Self>, part: UploadPart) {
        self.inner.lock().unwrap().upload_part = Some(part);
        self.persist_update();
    }

    /// Resumes a paused transfer.
    ///
    /// Emits an `Initiated` event and persists the update. Ignored unless
    /// the transfer is paused and has something to resume.
    pub fn resume(self: &Arc<Self>) {
        let target = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != TransferStatus::Paused {
                debug!(transfer_id = %self.transfer_id, status = ?inner.status, "resume ignored");
                return;
            }
            let Some(target) = ControlTarget::of(&inner) else {
                debug!(transfer_id = %self.transfer_id, "resume ignored: nothing to resume");
                return;
            };
            inner.status = TransferStatus::InProgress;
            target
        };

        match target {
            ControlTarget::Handle(handle) => handle.resume(),
            ControlTarget::Proxy(proxy) => proxy.resume(),
        }
        self.kind.emit_initiated(&self.transfer_id);
        self.persist_update();
    }

    /// Pauses an in-progress transfer.
    pub fn suspend(self: &Arc<Self>) {
        let target = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != TransferStatus::InProgress {
                debug!(transfer_id = %self.transfer_id, status = ?inner.status, "suspend ignored");
                return;
            }
            let Some(target) = ControlTarget::of(&inner) else {
                debug!(transfer_id = %self.transfer_id, "suspend ignored: nothing to suspend");
                return;
            };
            inner.status = TransferStatus::Paused;
            target
        };

        match target {
            ControlTarget::Handle(handle) => handle.suspend(),
            ControlTarget::Proxy(proxy) => proxy.pause(),
        }
        self.persist_update();
    }

    /// `suspend` under its caller-facing name.
    pub fn pause(self: &Arc<Self>) {
        self.suspend();
    }

    /// Cancels the transfer and removes its persisted record.
    ///
    /// Cancellation cascades: both the transport handle and the proxy
    /// session (and through it any in-flight part operations) are
    /// cancelled.
    pub fn cancel(&self) {
        let (handle, proxy) = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(
                inner.status,
                TransferStatus::Completed | TransferStatus::Cancelled
            ) {
                debug!(transfer_id = %self.transfer_id, status = ?inner.status, "cancel ignored");
                return;
            }
            if inner.handle.is_none() && inner.proxy.is_none() {
                debug!(transfer_id = %self.transfer_id, "cancel ignored: nothing to cancel");
                return;
            }
            inner.status = TransferStatus::Cancelled;
            (inner.handle.take(), inner.proxy.take())
        };

        if let Some(handle) = handle {
            handle.cancel();
        }
        if let Some(proxy) = proxy {
            proxy.cancel();
        }
        self.persist_remove();
    }

    /// Marks the transfer completed, emits the terminal event and removes
    /// the persisted record.
    pub fn complete(&self) {
        let emit = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(
                inner.status,
                TransferStatus::Cancelled | TransferStatus::Completed
            ) {
                debug!(transfer_id = %self.transfer_id, status = ?inner.status, "complete ignored");
                return;
            }
            inner.status = TransferStatus::Completed;
            inner.proxy = None;
            (self.options.location.clone(), inner.etag.clone())
        };

        self.kind.emit_completed(emit.0, emit.1);
        self.persist_remove();
    }

    /// Marks the transfer failed, forwards the error exactly once and
    /// removes the persisted record.
    pub fn fail(&self, error: Arc<TransferError>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.status.is_terminal() {
                debug!(transfer_id = %self.transfer_id, status = ?inner.status, "fail ignored");
                return;
            }
            inner.status = TransferStatus::Error;
            inner.proxy = None;
        }

        self.kind.emit_failed(error);
        self.persist_remove();
    }

    /// Forwards an out-of-band progress ping through the kind's callback.
    ///
    /// Marks the transfer in-progress as a side effect when no explicit
    /// status transition has happened yet.
    pub fn notify(&self, progress: TransferProgress) {
        {
            let mut inner = self.inner.lock().unwrap();
            if matches!(
                inner.status,
                TransferStatus::Unknown | TransferStatus::InProgress
            ) {
                inner.status = TransferStatus::InProgress;
            }
        }
        self.kind.emit_progress(progress);
    }

    /// Builds the persistable snapshot of this task.
    pub fn descriptor(&self) -> TransferDescriptor {
        let inner = self.inner.lock().unwrap();
        let multipart = inner.multipart.as_ref();
        TransferDescriptor {
            transfer_id: self.transfer_id.clone(),
            kind: self.kind.raw(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            content_type: self.options.content_type.clone(),
            request_headers: self.options.request_headers.clone(),
            location: self.options.location.clone(),
            upload_id: inner.upload_id.clone(),
            part_number: self.kind.part_number(),
            handle_id: inner
                .handle
                .as_ref()
                .map(|handle| handle.id())
                .or_else(|| inner.upload_part.as_ref().and_then(UploadPart::handle_id)),
            bytes: inner.upload_part.as_ref().map(UploadPart::bytes),
            bytes_transferred: inner.upload_part.as_ref().map(UploadPart::bytes_transferred),
            etag: inner
                .etag
                .clone()
                .or_else(|| inner.upload_part.as_ref().and_then(|p| p.etag().map(str::to_owned))),
            upload_file: multipart
                .and_then(MultipartUpload::upload_file)
                .map(UploadFileDescriptor::from),
            part_size: multipart
                .and_then(MultipartUpload::part_size)
                .map(|size| size.bytes()),
            parts: multipart.and_then(MultipartUpload::part_snapshots),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn store(&self) -> Weak<dyn TransferStore> {
        self.store.clone()
    }

    fn persist_update(self: &Arc<Self>) {
        if let Some(store) = self.store.upgrade()
            && let Err(error) = store.update(self)
        {
            warn!(transfer_id = %self.transfer_id, %error, "failed to persist transfer update");
        }
    }

    fn persist_remove(&self) {
        if let Some(store) = self.store.upgrade()
            && let Err(error) = store.remove(self)
        {
            warn!(transfer_id = %self.transfer_id, %error, "failed to remove persisted transfer");
        }
    }
}

enum ControlTarget {
    Handle(Arc<dyn TransportHandle>),
    Proxy(Arc<dyn TransferProxy>),
}

impl ControlTarget {
    /// The transport handle wins over the proxy when both are attached.
    fn of(inner: &TaskInner) -> Option<Self> {
        if let Some(handle) = &inner.handle {
            return Some(ControlTarget::Handle(Arc::clone(handle)));
        }
        inner
            .proxy
            .as_ref()
            .map(|proxy| ControlTarget::Proxy(Arc::clone(proxy)))
    }
}
