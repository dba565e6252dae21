//! The durable transfer database.
//!
//! Single source of truth for which transfers exist, live or persisted.
//! One JSON descriptor file per transfer id lives in a dedicated
//! directory owned exclusively by this component; recovery re-links
//! descriptors to the transport layer's surviving handles and reassembles
//! multipart aggregates so interrupted uploads can resume where they
//! stopped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use barge_protocol::{
    HandleId, RawTransferKind, TransferDescriptor, TransferId, UploadId,
};
use barge_transfer::{MultipartUpload, UploadFile, UploadPart, UploadPartSize, UploadParts};

use crate::error::TransferError;
use crate::events::{
    DownloadEventHandler, MultipartUploadEventHandler, TransferKind, UploadEventHandler,
};
use crate::task::TransferTask;
use crate::transport::{TransferStore, TransportHandle, TransportLister};

/// Descriptors untouched for this long are dropped instead of recovered.
const STALE_AFTER_DAYS: i64 = 7;

/// One transfer reconstructed by recovery, paired with the multipart
/// aggregates rebuilt from the same descriptor set.
pub struct RecoveredTransfer {
    pub task: Arc<TransferTask>,
    pub multipart_uploads: Vec<MultipartUpload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryState {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Default)]
struct EventHandlers {
    on_download: Option<DownloadEventHandler>,
    on_upload: Option<UploadEventHandler>,
    on_multipart_upload: Option<MultipartUploadEventHandler>,
}

struct DbState {
    tasks: HashMap<TransferId, Arc<TransferTask>>,
    recovery: RecoveryState,
}

/// File-backed registry of every in-flight transfer.
///
/// Explicitly constructed and injected wherever tasks are created; the
/// descriptor directory is owned exclusively by this instance and no
/// other component reads or writes descriptor files directly.
pub struct TransferDatabase {
    dir: PathBuf,
    state: Mutex<DbState>,
    handlers: Mutex<EventHandlers>,
}

impl TransferDatabase {
    /// Opens (creating if needed) a database over the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Arc<Self>, TransferError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            state: Mutex::new(DbState {
                tasks: HashMap::new(),
                recovery: RecoveryState::NotStarted,
            }),
            handlers: Mutex::new(EventHandlers::default()),
        }))
    }

    /// The persistence seam handed to tasks created against this
    /// database.
    pub fn as_store(self: &Arc<Self>) -> std::sync::Weak<dyn TransferStore> {
        let this: Arc<dyn TransferStore> = self.clone();
        let weak: std::sync::Weak<dyn TransferStore> = Arc::downgrade(&this);
        weak
    }

    pub fn tasks_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn task(&self, transfer_id: &str) -> Option<Arc<TransferTask>> {
        self.state.lock().unwrap().tasks.get(transfer_id).cloned()
    }

    /// Attaches the callbacks that recovered transfers report through.
    ///
    /// Descriptors recovered for a kind with no attached handler get a
    /// silent handler.
    pub fn attach_event_handlers(
        &self,
        on_download: Option<DownloadEventHandler>,
        on_upload: Option<UploadEventHandler>,
        on_multipart_upload: Option<MultipartUploadEventHandler>,
    ) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.on_download = on_download;
        handlers.on_upload = on_upload;
        handlers.on_multipart_upload = on_multipart_upload;
    }

    /// Reads every descriptor in the database directory.
    ///
    /// A file that cannot be read or parsed is deleted and skipped, never
    /// surfaced as an error; so is a descriptor that has gone stale.
    pub fn load_descriptors(&self) -> HashMap<TransferId, TransferDescriptor> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(dir = %self.dir.display(), %error, "failed to read database directory");
                return HashMap::new();
            }
        };

        let stale_cutoff = Utc::now() - Duration::days(STALE_AFTER_DAYS);
        let mut descriptors = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_descriptor(&path) {
                Ok(descriptor) if descriptor.updated_at < stale_cutoff => {
                    debug!(path = %path.display(), "dropping stale descriptor");
                    remove_file_if_exists(&path);
                }
                Ok(descriptor) => {
                    descriptors.insert(descriptor.transfer_id.clone(), descriptor);
                }
                Err(error) => {
                    debug!(path = %path.display(), %error, "dropping unreadable descriptor");
                    remove_file_if_exists(&path);
                }
            }
        }
        descriptors
    }

    /// Startup recovery: reconstructs live tasks and multipart aggregates
    /// from persisted descriptors plus the transport's active handles.
    ///
    /// Runs at most once per database instance; later calls are no-ops
    /// returning an empty set.
    pub async fn recover(
        self: &Arc<Self>,
        transport: &dyn TransportLister,
    ) -> Result<Vec<RecoveredTransfer>, TransferError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.recovery != RecoveryState::NotStarted {
                debug!("recovery already ran, skipping");
                return Ok(Vec::new());
            }
            state.recovery = RecoveryState::InProgress;
        }

        let db = Arc::clone(self);
        let descriptors = tokio::task::spawn_blocking(move || db.load_descriptors())
            .await
            .map_err(|error| TransferError::Background(error.to_string()))?;

        let handles: HashMap<HandleId, Arc<dyn TransportHandle>> = transport
            .active_handles()
            .await
            .into_iter()
            .map(|handle| (handle.id(), handle))
            .collect();

        let recovered = self.link_descriptors(&descriptors, &handles);

        {
            let mut state = self.state.lock().unwrap();
            for pair in &recovered {
                state
                    .tasks
                    .insert(pair.task.transfer_id().clone(), Arc::clone(&pair.task));
            }
            state.recovery = RecoveryState::Completed;
        }
        info!(
            descriptors = descriptors.len(),
            recovered = recovered.len(),
            "transfer recovery finished"
        );
        Ok(recovered)
    }

    /// Links descriptors to live transport handles and reassembles
    /// multipart aggregates grouped by upload id.
    fn link_descriptors(
        self: &Arc<Self>,
        descriptors: &HashMap<TransferId, TransferDescriptor>,
        handles: &HashMap<HandleId, Arc<dyn TransportHandle>>,
    ) -> Vec<RecoveredTransfer> {
        let mut tasks = Vec::new();
        for descriptor in descriptors.values() {
            let Some(kind) = self.default_kind(descriptor) else {
                continue;
            };
            let live = descriptor
                .handle_id
                .and_then(|handle_id| handles.get(&handle_id).cloned());
            if live.is_some() {
                tasks.push(TransferTask::from_descriptor(
                    descriptor,
                    kind,
                    live,
                    self.as_store(),
                ));
            } else if descriptor.kind == RawTransferKind::MultipartUpload {
                // A multipart parent has no transport handle of its own;
                // its parts carry them.
                tasks.push(TransferTask::from_descriptor(
                    descriptor,
                    kind,
                    None,
                    self.as_store(),
                ));
            } else {
                debug!(
                    transfer_id = %descriptor.transfer_id,
                    "dropping descriptor with no surviving transport handle"
                );
            }
        }

        let mut groups: HashMap<&UploadId, Vec<&TransferDescriptor>> = HashMap::new();
        for descriptor in descriptors.values() {
            if let Some(upload_id) = &descriptor.upload_id {
                groups.entry(upload_id).or_default().push(descriptor);
            }
        }

        let multipart_uploads: Vec<MultipartUpload> = groups
            .into_iter()
            .filter_map(|(upload_id, group)| Self::rebuild_multipart(upload_id, &group, handles))
            .collect();

        tasks
            .into_iter()
            .map(|task| RecoveredTransfer {
                task,
                multipart_uploads: multipart_uploads.clone(),
            })
            .collect()
    }

    /// Rebuilds one multipart aggregate from its descriptor group.
    ///
    /// A group is only promoted to a resumable aggregate when its parent
    /// descriptor is present and the derived layout has more than one
    /// part.
    fn rebuild_multipart(
        upload_id: &UploadId,
        group: &[&TransferDescriptor],
        handles: &HashMap<HandleId, Arc<dyn TransportHandle>>,
    ) -> Option<MultipartUpload> {
        let parent = group.iter().find(|desc| desc.is_multipart_parent())?;
        let file_desc = parent.upload_file.as_ref()?;
        let file = UploadFile::from(file_desc);

        let part_size = match parent.part_size {
            Some(bytes) => UploadPartSize::new(bytes).ok()?,
            None => UploadPartSize::for_file_size(file.size).ok()?,
        };
        let mut parts = UploadParts::build(file.size, part_size).ok()?;
        if parts.len() <= 1 {
            return None;
        }

        // Fold in the parent's part snapshot, then the part descriptors;
        // only parts whose transport handle survived stay in progress.
        if let Some(snapshots) = &parent.parts {
            for snapshot in snapshots {
                let recovered = if let Some(etag) = &snapshot.etag {
                    UploadPart::Completed {
                        bytes: snapshot.bytes,
                        etag: etag.clone(),
                    }
                } else if let Some(handle_id) = snapshot.handle_id
                    && handles.contains_key(&handle_id)
                {
                    UploadPart::InProgress {
                        bytes: snapshot.bytes,
                        bytes_transferred: snapshot.bytes_transferred,
                        handle_id,
                    }
                } else {
                    continue;
                };
                let _ = parts.set(snapshot.part_number, recovered);
            }
        }
        for descriptor in group.iter().filter(|desc| desc.is_multipart_part()) {
            let Some(part_number) = descriptor.part_number else {
                continue;
            };
            let Ok(current) = parts.find(part_number) else {
                continue;
            };
            let bytes = current.bytes();
            if let Some(etag) = &descriptor.etag {
                let _ = parts.set(
                    part_number,
                    UploadPart::Completed {
                        bytes,
                        etag: etag.clone(),
                    },
                );
            } else if let Some(handle_id) = descriptor.handle_id
                && handles.contains_key(&handle_id)
            {
                let _ = parts.set(
                    part_number,
                    UploadPart::InProgress {
                        bytes,
                        bytes_transferred: descriptor.bytes_transferred.unwrap_or(0),
                        handle_id,
                    },
                );
            }
        }

        Some(MultipartUpload::Parts {
            upload_id: upload_id.clone(),
            file,
            part_size,
            parts,
        })
    }

    /// Persists every currently registered live task.
    ///
    /// Unlike loading, a write failure here surfaces to the caller.
    pub fn store_all(&self) -> Result<(), TransferError> {
        let state = self.state.lock().unwrap();
        for task in state.tasks.values() {
            self.write_descriptor(&task.descriptor())?;
        }
        Ok(())
    }

    /// Flushes all live task state to disk before the hosting process is
    /// suspended.
    pub async fn prepare_for_suspension(self: &Arc<Self>) -> Result<(), TransferError> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || db.store_all())
            .await
            .map_err(|error| TransferError::Background(error.to_string()))?
    }

    /// Rebuilds the live transfer kind for a persisted descriptor.
    fn default_kind(&self, descriptor: &TransferDescriptor) -> Option<TransferKind> {
        let handlers = self.handlers.lock().unwrap();
        match descriptor.kind {
            RawTransferKind::Download => Some(TransferKind::Download {
                on_event: handlers
                    .on_download
                    .clone()
                    .unwrap_or_else(|| Arc::new(|_| {})),
            }),
            RawTransferKind::Upload => Some(TransferKind::Upload {
                on_event: handlers
                    .on_upload
                    .clone()
                    .unwrap_or_else(|| Arc::new(|_| {})),
            }),
            RawTransferKind::MultipartUpload => Some(TransferKind::MultipartUpload {
                on_event: handlers
                    .on_multipart_upload
                    .clone()
                    .unwrap_or_else(|| Arc::new(|_| {})),
            }),
            RawTransferKind::MultipartUploadPart => {
                match (&descriptor.upload_id, descriptor.part_number) {
                    (Some(upload_id), Some(part_number)) => {
                        Some(TransferKind::MultipartUploadPart {
                            upload_id: upload_id.clone(),
                            part_number,
                        })
                    }
                    _ => {
                        warn!(
                            transfer_id = %descriptor.transfer_id,
                            "part descriptor missing upload id or part number"
                        );
                        None
                    }
                }
            }
        }
    }

    fn descriptor_path(&self, transfer_id: &str) -> PathBuf {
        self.dir.join(format!("{transfer_id}.json"))
    }

    fn write_descriptor(&self, descriptor: &TransferDescriptor) -> Result<(), TransferError> {
        let json = serde_json::to_vec(descriptor)?;
        fs::write(self.descriptor_path(&descriptor.transfer_id), json)?;
        Ok(())
    }

    fn read_descriptor(path: &Path) -> Result<TransferDescriptor, TransferError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

impl TransferStore for TransferDatabase {
    fn insert(&self, task: &Arc<TransferTask>) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        state
            .tasks
            .insert(task.transfer_id().clone(), Arc::clone(task));
        self.write_descriptor(&task.descriptor())
    }

    fn update(&self, task: &Arc<TransferTask>) -> Result<(), TransferError> {
        self.insert(task)
    }

    /// Removes the in-memory entry and the descriptor file in one
    /// critical section.
    fn remove(&self, task: &TransferTask) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        state.tasks.remove(task.transfer_id());
        remove_file_if_exists(&self.descriptor_path(task.transfer_id()));
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), %error, "failed to remove descriptor file");
    }
}
