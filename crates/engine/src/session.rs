//! Orchestration of one multipart upload.
//!
//! A session drives a single multipart upload from creation through
//! concurrency-bounded part dispatch to completion or abort. Transport
//! callbacks may arrive on any thread; every mutation runs through the
//! session's lock, and collaborator calls are made outside it so a client
//! that reports synchronously cannot deadlock the session.

use std::cmp::min;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use barge_protocol::{HandleId, PartNumber, TransferProgress, UploadId};
use barge_transfer::{
    MultipartUpload, MultipartUploadEvent, SharedError, UploadFile, UploadPart, UploadPartEvent,
};

use crate::error::TransferError;
use crate::events::TransferKind;
use crate::task::{TransferOptions, TransferProxy, TransferTask};
use crate::transport::{MultipartUploadClient, PartUploadRequest};

/// Retry budget for failed part uploads.
///
/// A failed part is rewound to pending and re-dispatched while the budget
/// lasts; once exhausted the session aborts, forwarding the part's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { limit: 3 }
    }
}

impl RetryPolicy {
    /// No retries: the first part failure aborts the upload.
    pub fn none() -> Self {
        Self { limit: 0 }
    }
}

/// Default concurrency bound for part dispatch.
///
/// Part uploads are I/O-bound; oversubscribing relative to the processor
/// count keeps the network busy without unbounded buffering of part data.
pub fn default_concurrent_limit() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        * 2
}

/// Drives one multipart upload from creation to completion or abort.
pub struct MultipartUploadSession {
    client: Arc<dyn MultipartUploadClient>,
    task: Arc<TransferTask>,
    file: UploadFile,
    concurrent_limit: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
    me: Weak<MultipartUploadSession>,
    state: Mutex<SessionState>,
}

struct SessionState {
    upload: MultipartUpload,
    retry_count: u32,
    sub_tasks: HashMap<PartNumber, Arc<TransferTask>>,
}

/// Work decided under the session lock, executed after it is released so
/// that a synchronously reporting client cannot re-enter a held lock.
enum AfterEvent {
    Nothing,
    Dispatch,
    PauseCleanup {
        handles: Vec<HandleId>,
        drained: Vec<Arc<TransferTask>>,
        progress: Option<TransferProgress>,
    },
    TaskCompleted,
    CallComplete {
        upload_id: UploadId,
    },
    CallAbort {
        upload_id: UploadId,
    },
    Aborted {
        error: Option<SharedError>,
    },
    BeginAbort {
        error: Option<SharedError>,
    },
    Fail(Arc<TransferError>),
}

impl MultipartUploadSession {
    /// Creates a session over a multipart-upload task.
    ///
    /// Fails unless the task's kind is `MultipartUpload`.
    pub fn new(
        client: Arc<dyn MultipartUploadClient>,
        task: Arc<TransferTask>,
        file: UploadFile,
    ) -> Result<Arc<Self>, TransferError> {
        Self::with_limits(
            client,
            task,
            file,
            default_concurrent_limit(),
            RetryPolicy::default(),
        )
    }

    /// Creates a session with an explicit concurrency bound and retry
    /// policy.
    pub fn with_limits(
        client: Arc<dyn MultipartUploadClient>,
        task: Arc<TransferTask>,
        file: UploadFile,
        concurrent_limit: usize,
        retry: RetryPolicy,
    ) -> Result<Arc<Self>, TransferError> {
        Self::build(client, task, file, MultipartUpload::None, concurrent_limit, retry)
    }

    /// Rebuilds a session around an aggregate reconstructed by recovery.
    pub fn from_recovered(
        client: Arc<dyn MultipartUploadClient>,
        task: Arc<TransferTask>,
        upload: MultipartUpload,
    ) -> Result<Arc<Self>, TransferError> {
        let file = upload
            .upload_file()
            .cloned()
            .ok_or(TransferError::NotResumable)?;
        Self::build(
            client,
            task,
            file,
            upload,
            default_concurrent_limit(),
            RetryPolicy::default(),
        )
    }

    fn build(
        client: Arc<dyn MultipartUploadClient>,
        task: Arc<TransferTask>,
        file: UploadFile,
        upload: MultipartUpload,
        concurrent_limit: usize,
        retry: RetryPolicy,
    ) -> Result<Arc<Self>, TransferError> {
        if !matches!(task.kind(), TransferKind::MultipartUpload { .. }) {
            return Err(TransferError::InvalidTransferKind);
        }
        let concurrent_limit = concurrent_limit.max(1);
        let session = Arc::new_cyclic(|me| Self {
            client,
            task: Arc::clone(&task),
            file,
            concurrent_limit,
            retry,
            cancel: CancellationToken::new(),
            me: me.clone(),
            state: Mutex::new(SessionState {
                upload,
                retry_count: 0,
                sub_tasks: HashMap::new(),
            }),
        });
        task.set_proxy(Arc::clone(&session) as Arc<dyn TransferProxy>);
        info!(
            transfer_id = %task.transfer_id(),
            limit = concurrent_limit,
            "multipart upload session ready"
        );
        Ok(session)
    }

    pub fn task(&self) -> &Arc<TransferTask> {
        &self.task
    }

    /// Source file of the upload.
    pub fn upload_file(&self) -> UploadFile {
        self.file.clone()
    }

    pub fn upload_id(&self) -> Option<UploadId> {
        self.state.lock().unwrap().upload.upload_id().cloned()
    }

    pub fn parts_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .upload
            .parts()
            .map_or(0, barge_transfer::UploadParts::len)
    }

    pub fn in_progress_count(&self) -> usize {
        self.state.lock().unwrap().upload.in_progress_count()
    }

    pub fn pending_part_numbers(&self) -> Vec<PartNumber> {
        self.state.lock().unwrap().upload.pending_part_numbers()
    }

    pub fn parts_completed(&self) -> bool {
        self.state.lock().unwrap().upload.parts_completed()
    }

    pub fn parts_failed(&self) -> bool {
        self.state.lock().unwrap().upload.parts_failed()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().upload.is_paused()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().upload.is_completed()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().unwrap().upload.is_aborted()
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().unwrap().upload.is_failed()
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.state.lock().unwrap().upload.progress()
    }

    /// Begins the upload: reports `Initiated` and asks the client to
    /// create the remote multipart upload.
    pub fn start(self: &Arc<Self>) {
        self.task.kind().emit_initiated(self.task.transfer_id());
        if let Err(error) = self.client.create_upload(Arc::clone(self)) {
            self.fail(Arc::new(error));
        }
    }

    /// Routes a session-level event into the aggregate state machine and
    /// acts on the resulting state.
    pub fn handle_upload_event(&self, event: MultipartUploadEvent) {
        debug!(transfer_id = %self.task.transfer_id(), event = ?event, "multipart upload event");

        let after = {
            let mut state = self.state.lock().unwrap();

            // The abort cause lives in the aborting state; capture it
            // before the confirmation transition discards it.
            let abort_error = match (&event, &state.upload) {
                (MultipartUploadEvent::Aborted, MultipartUpload::Aborting { error, .. }) => {
                    error.clone()
                }
                _ => None,
            };

            if let Err(error) = state.upload.transition(event) {
                drop(state);
                self.fail(Arc::new(TransferError::from(error)));
                return;
            }
            self.task.set_multipart(state.upload.clone());

            match &state.upload {
                MultipartUpload::Parts { .. } => AfterEvent::Dispatch,
                MultipartUpload::Paused { .. } => {
                    let handles = state.upload.rewind_active_parts();
                    let drained = state.sub_tasks.drain().map(|(_, task)| task).collect();
                    self.task.set_multipart(state.upload.clone());
                    let progress = state.upload.progress();
                    AfterEvent::PauseCleanup {
                        handles,
                        drained,
                        progress,
                    }
                }
                MultipartUpload::Completed { .. } => AfterEvent::TaskCompleted,
                MultipartUpload::Aborting { upload_id, .. } => AfterEvent::CallAbort {
                    upload_id: upload_id.clone(),
                },
                MultipartUpload::Aborted { .. } => AfterEvent::Aborted { error: abort_error },
                _ => AfterEvent::Nothing,
            }
        };

        self.run(after);
    }

    /// Routes a part-level event into the aggregate state machine, keeps
    /// the part's sub-task in sync, and acts on the resulting state.
    pub fn handle_part_event(&self, event: UploadPartEvent) {
        debug!(transfer_id = %self.task.transfer_id(), event = ?event, "upload part event");

        let (after, progress) = {
            let mut state = self.state.lock().unwrap();

            if let Err(error) = state.upload.transition_part(&event) {
                drop(state);
                self.fail(Arc::new(TransferError::from(error)));
                return;
            }
            self.task.set_multipart(state.upload.clone());
            self.sync_sub_task(&mut state, &event);

            let progress = if event.is_terminal() {
                state.upload.progress()
            } else {
                None
            };

            let after = match &event {
                UploadPartEvent::Queued { .. }
                | UploadPartEvent::Started { .. }
                | UploadPartEvent::Progress { .. } => AfterEvent::Nothing,
                UploadPartEvent::Completed { .. } => {
                    if state.upload.has_pending_parts() {
                        AfterEvent::Dispatch
                    } else if state.upload.parts_completed() {
                        match state.upload.validate_for_completion() {
                            Ok(()) => match state.upload.upload_id() {
                                Some(upload_id) => AfterEvent::CallComplete {
                                    upload_id: upload_id.clone(),
                                },
                                None => AfterEvent::Nothing,
                            },
                            Err(error) => {
                                AfterEvent::Fail(Arc::new(TransferError::from(error)))
                            }
                        }
                    } else {
                        Self::abort_decision(&state)
                    }
                }
                UploadPartEvent::Failed { part_number, error } => {
                    self.retry_or_settle(&mut state, *part_number, error)
                }
            };
            (after, progress)
        };

        if let Some(progress) = progress {
            self.task.notify(progress);
        }
        self.run(after);
    }

    /// Marks the aggregate failed and forwards the error through the
    /// task's callback.
    pub fn fail(&self, error: Arc<TransferError>) {
        warn!(transfer_id = %self.task.transfer_id(), %error, "multipart upload failed");
        {
            let mut state = self.state.lock().unwrap();
            let cause: SharedError = error.clone();
            state.upload.fail(cause);
            self.task.set_multipart(state.upload.clone());
        }
        self.task.fail(error);
        self.cleanup_temporary_file();
    }

    /// Deletes the engine-owned temporary source copy once the upload is
    /// terminal.
    fn cleanup_temporary_file(&self) {
        if !self.file.temporary {
            return;
        }
        if let Err(error) = std::fs::remove_file(&self.file.path)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            debug!(
                path = %self.file.path.display(),
                %error,
                "failed to remove temporary upload file"
            );
        }
    }

    /// Concurrency-bounded dispatch of pending parts.
    ///
    /// Selected parts are marked queued under the lock before any
    /// transport call is issued, so callbacks racing ahead of this loop
    /// cannot be misattributed. A saturated session is a no-op; dispatch
    /// resumes on the next completion event.
    fn dispatch(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let (jobs, upload_id, file, part_size) = {
            let mut state = self.state.lock().unwrap();
            let (upload_id, file, part_size) = match &state.upload {
                MultipartUpload::Parts {
                    upload_id,
                    file,
                    part_size,
                    ..
                } => (upload_id.clone(), file.clone(), *part_size),
                _ => return,
            };

            let in_progress = state.upload.in_progress_count();
            if in_progress >= self.concurrent_limit {
                debug!(
                    transfer_id = %self.task.transfer_id(),
                    in_progress,
                    "at concurrency limit, deferring dispatch"
                );
                return;
            }
            let pending = state.upload.pending_part_numbers();
            if pending.is_empty() {
                return;
            }
            let slots = min(self.concurrent_limit, self.concurrent_limit - in_progress);
            let selected: Vec<PartNumber> = pending.into_iter().take(slots).collect();

            let mut jobs = Vec::with_capacity(selected.len());
            for &part_number in &selected {
                if state
                    .upload
                    .transition_part(&UploadPartEvent::Queued { part_number })
                    .is_err()
                {
                    continue;
                }
                let Some(bytes) = state
                    .upload
                    .parts()
                    .and_then(|parts| parts.find(part_number).ok())
                    .map(UploadPart::bytes)
                else {
                    continue;
                };
                let sub_task = self.create_sub_task(&upload_id, part_number, bytes);
                state.sub_tasks.insert(part_number, Arc::clone(&sub_task));
                jobs.push((part_number, bytes, sub_task));
            }
            self.task.set_multipart(state.upload.clone());
            (jobs, upload_id, file, part_size)
        };

        let Some(me) = self.me.upgrade() else {
            return;
        };
        for (part_number, bytes, sub_task) in jobs {
            if self.cancel.is_cancelled() || self.is_aborted() {
                return;
            }
            let request = PartUploadRequest {
                upload_id: upload_id.clone(),
                part_number,
                file: file.clone(),
                offset: u64::from(part_number - 1) * part_size.bytes(),
                bytes,
            };
            if let Err(error) = self.client.upload_part(Arc::clone(&me), request, sub_task) {
                self.fail(Arc::new(error));
                return;
            }
        }
    }

    /// Decides whether a failed part gets another attempt or the session
    /// settles toward an abort.
    fn retry_or_settle(
        &self,
        state: &mut SessionState,
        part_number: PartNumber,
        error: &SharedError,
    ) -> AfterEvent {
        let in_parts = matches!(state.upload, MultipartUpload::Parts { .. });
        if in_parts && state.retry_count < self.retry.limit {
            state.retry_count += 1;
            debug!(
                transfer_id = %self.task.transfer_id(),
                part_number,
                attempt = state.retry_count,
                "retrying failed part"
            );
            return match state.upload.rewind_part(part_number) {
                Ok(()) => {
                    self.task.set_multipart(state.upload.clone());
                    AfterEvent::Dispatch
                }
                Err(rewind_error) => AfterEvent::Fail(Arc::new(TransferError::from(rewind_error))),
            };
        }

        if in_parts && self.retry.limit > 0 {
            warn!(
                transfer_id = %self.task.transfer_id(),
                part_number,
                attempts = state.retry_count,
                %error,
                "part retry budget exhausted"
            );
        }
        Self::abort_decision(state)
    }

    /// The abort rule: at least one part failed for good and none remain
    /// pending, queued or in progress.
    fn abort_decision(state: &SessionState) -> AfterEvent {
        let upload = &state.upload;
        let Some(parts) = upload.parts() else {
            return AfterEvent::Nothing;
        };
        if parts.any_failed() && !parts.has_pending() && parts.active_count() == 0 {
            let error = parts.iter().find_map(|part| match part {
                UploadPart::Failed { error, .. } => Some(error.clone()),
                _ => None,
            });
            AfterEvent::BeginAbort { error }
        } else {
            AfterEvent::Nothing
        }
    }

    fn sync_sub_task(&self, state: &mut SessionState, event: &UploadPartEvent) {
        let part_number = event.part_number();
        match event {
            UploadPartEvent::Started { .. } | UploadPartEvent::Progress { .. } => {
                let part = state
                    .upload
                    .parts()
                    .and_then(|parts| parts.find(part_number).ok())
                    .cloned();
                if let (Some(sub_task), Some(part)) = (state.sub_tasks.get(&part_number), part) {
                    sub_task.set_upload_part(part);
                }
            }
            UploadPartEvent::Completed { etag, .. } => {
                if let Some(sub_task) = state.sub_tasks.remove(&part_number) {
                    sub_task.record_etag(etag.clone());
                    sub_task.complete();
                }
            }
            UploadPartEvent::Failed { error, .. } => {
                if let Some(sub_task) = state.sub_tasks.remove(&part_number) {
                    sub_task.fail(Arc::new(TransferError::PartUpload(error.clone())));
                }
            }
            UploadPartEvent::Queued { .. } => {}
        }
    }

    fn create_sub_task(
        &self,
        upload_id: &UploadId,
        part_number: PartNumber,
        bytes: u64,
    ) -> Arc<TransferTask> {
        let sub_task = TransferTask::new(
            TransferKind::MultipartUploadPart {
                upload_id: upload_id.clone(),
                part_number,
            },
            self.task.bucket(),
            self.task.key(),
            TransferOptions::default(),
            self.task.store(),
        );
        sub_task.set_upload_part(UploadPart::Pending { bytes });
        sub_task
    }

    fn run(&self, after: AfterEvent) {
        match after {
            AfterEvent::Nothing => {}
            AfterEvent::Dispatch => self.dispatch(),
            AfterEvent::PauseCleanup {
                handles,
                drained,
                progress,
            } => {
                if !handles.is_empty() {
                    self.client.cancel_part_uploads(&handles);
                }
                for sub_task in drained {
                    sub_task.cancel();
                }
                if let Some(progress) = progress {
                    self.task.notify(progress);
                }
            }
            AfterEvent::TaskCompleted => {
                self.task.complete();
                self.cleanup_temporary_file();
            }
            AfterEvent::CallComplete { upload_id } => {
                let Some(me) = self.me.upgrade() else { return };
                if let Err(error) = self.client.complete_upload(me, &upload_id) {
                    self.fail(Arc::new(error));
                }
            }
            AfterEvent::CallAbort { upload_id } => {
                let Some(me) = self.me.upgrade() else { return };
                if let Err(error) = self.client.abort_upload(me, &upload_id) {
                    self.fail(Arc::new(error));
                }
            }
            AfterEvent::Aborted { error } => {
                match error {
                    Some(cause) => self.task.fail(Arc::new(TransferError::PartUpload(cause))),
                    None => self.task.complete(),
                }
                self.cleanup_temporary_file();
            }
            AfterEvent::BeginAbort { error } => {
                self.handle_upload_event(MultipartUploadEvent::Aborting { error });
            }
            AfterEvent::Fail(error) => self.fail(error),
        }
    }
}

impl TransferProxy for MultipartUploadSession {
    fn pause(&self) {
        self.handle_upload_event(MultipartUploadEvent::Pausing);
    }

    /// Resumes a paused session, or re-enters dispatch directly for a
    /// session reconstructed from persisted state.
    fn resume(&self) {
        if self.is_paused() {
            self.handle_upload_event(MultipartUploadEvent::Resuming);
        } else {
            self.dispatch();
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
        self.handle_upload_event(MultipartUploadEvent::Aborting { error: None });
    }
}
