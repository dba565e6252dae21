use barge_protocol::{HandleId, PartNumber, PartSnapshot, TransferProgress, UploadId};

use crate::{PartError, SharedError, UploadFile, UploadPart, UploadPartSize, UploadParts};

/// Errors raised while driving the multipart-upload state machine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MultipartError {
    #[error("invalid transition from {state} on {event}")]
    InvalidStateTransition {
        state: &'static str,
        event: &'static str,
    },

    #[error("multipart upload has incomplete parts")]
    PartsNotDone,

    #[error("multipart upload has failed parts")]
    PartsFailed,

    #[error(transparent)]
    Part(#[from] PartError),
}

/// Session-level events driving the aggregate state machine.
#[derive(Debug, Clone)]
pub enum MultipartUploadEvent {
    /// The remote multipart upload has been created.
    Created { upload_id: UploadId, file: UploadFile },
    Pausing,
    Resuming,
    /// The remote store confirmed completion of the whole upload.
    Completed,
    /// Abort requested, optionally carrying the error that triggered it.
    Aborting { error: Option<SharedError> },
    /// The remote store confirmed the abort.
    Aborted,
}

impl MultipartUploadEvent {
    fn name(&self) -> &'static str {
        match self {
            MultipartUploadEvent::Created { .. } => "created",
            MultipartUploadEvent::Pausing => "pausing",
            MultipartUploadEvent::Resuming => "resuming",
            MultipartUploadEvent::Completed => "completed",
            MultipartUploadEvent::Aborting { .. } => "aborting",
            MultipartUploadEvent::Aborted => "aborted",
        }
    }
}

/// Part-level events reported by the transport layer.
#[derive(Debug, Clone)]
pub enum UploadPartEvent {
    Queued {
        part_number: PartNumber,
    },
    /// The transport accepted the sub-operation and assigned a handle.
    Started {
        part_number: PartNumber,
        handle_id: HandleId,
    },
    Progress {
        part_number: PartNumber,
        bytes_transferred: u64,
    },
    Completed {
        part_number: PartNumber,
        etag: String,
    },
    Failed {
        part_number: PartNumber,
        error: SharedError,
    },
}

impl UploadPartEvent {
    pub fn part_number(&self) -> PartNumber {
        match self {
            UploadPartEvent::Queued { part_number }
            | UploadPartEvent::Started { part_number, .. }
            | UploadPartEvent::Progress { part_number, .. }
            | UploadPartEvent::Completed { part_number, .. }
            | UploadPartEvent::Failed { part_number, .. } => *part_number,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPartEvent::Completed { .. } | UploadPartEvent::Failed { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            UploadPartEvent::Queued { .. } => "part queued",
            UploadPartEvent::Started { .. } => "part started",
            UploadPartEvent::Progress { .. } => "part progress",
            UploadPartEvent::Completed { .. } => "part completed",
            UploadPartEvent::Failed { .. } => "part failed",
        }
    }
}

/// Aggregate state of one multipart upload.
///
/// `Parts` is entered exactly once, after the remote upload has been
/// created; from there the upload either completes (every part
/// completed), aborts (a part failed for good), or fails outright.
#[derive(Debug, Clone)]
pub enum MultipartUpload {
    None,
    /// Remote upload created; parts not derived yet.
    Created {
        upload_id: UploadId,
        file: UploadFile,
    },
    Parts {
        upload_id: UploadId,
        file: UploadFile,
        part_size: UploadPartSize,
        parts: UploadParts,
    },
    Paused {
        upload_id: UploadId,
        file: UploadFile,
        part_size: UploadPartSize,
        parts: UploadParts,
    },
    Completed {
        upload_id: UploadId,
    },
    Aborting {
        upload_id: UploadId,
        error: Option<SharedError>,
    },
    Aborted {
        upload_id: UploadId,
    },
    Failed {
        upload_id: Option<UploadId>,
        error: SharedError,
    },
}

impl MultipartUpload {
    fn state_name(&self) -> &'static str {
        match self {
            MultipartUpload::None => "none",
            MultipartUpload::Created { .. } => "created",
            MultipartUpload::Parts { .. } => "parts",
            MultipartUpload::Paused { .. } => "paused",
            MultipartUpload::Completed { .. } => "completed",
            MultipartUpload::Aborting { .. } => "aborting",
            MultipartUpload::Aborted { .. } => "aborted",
            MultipartUpload::Failed { .. } => "failed",
        }
    }

    /// Applies a session-level event.
    pub fn transition(&mut self, event: MultipartUploadEvent) -> Result<(), MultipartError> {
        match (&*self, event) {
            // The created event derives the part layout immediately; the
            // upload is dispatchable as soon as the remote side exists.
            (
                MultipartUpload::None | MultipartUpload::Created { .. },
                MultipartUploadEvent::Created { upload_id, file },
            ) => {
                let part_size = UploadPartSize::for_file_size(file.size)?;
                let parts = UploadParts::build(file.size, part_size)?;
                *self = MultipartUpload::Parts {
                    upload_id,
                    file,
                    part_size,
                    parts,
                };
                Ok(())
            }
            (MultipartUpload::Parts { .. }, MultipartUploadEvent::Pausing) => {
                let MultipartUpload::Parts {
                    upload_id,
                    file,
                    part_size,
                    parts,
                } = std::mem::replace(self, MultipartUpload::None)
                else {
                    unreachable!()
                };
                *self = MultipartUpload::Paused {
                    upload_id,
                    file,
                    part_size,
                    parts,
                };
                Ok(())
            }
            (MultipartUpload::Paused { .. }, MultipartUploadEvent::Resuming) => {
                let MultipartUpload::Paused {
                    upload_id,
                    file,
                    part_size,
                    parts,
                } = std::mem::replace(self, MultipartUpload::None)
                else {
                    unreachable!()
                };
                *self = MultipartUpload::Parts {
                    upload_id,
                    file,
                    part_size,
                    parts,
                };
                Ok(())
            }
            (MultipartUpload::Parts { upload_id, .. }, MultipartUploadEvent::Completed) => {
                let upload_id = upload_id.clone();
                *self = MultipartUpload::Completed { upload_id };
                Ok(())
            }
            (
                MultipartUpload::Created { upload_id, .. }
                | MultipartUpload::Parts { upload_id, .. }
                | MultipartUpload::Paused { upload_id, .. },
                MultipartUploadEvent::Aborting { error },
            ) => {
                let upload_id = upload_id.clone();
                *self = MultipartUpload::Aborting { upload_id, error };
                Ok(())
            }
            (MultipartUpload::Aborting { upload_id, .. }, MultipartUploadEvent::Aborted) => {
                let upload_id = upload_id.clone();
                *self = MultipartUpload::Aborted { upload_id };
                Ok(())
            }
            (state, event) => Err(MultipartError::InvalidStateTransition {
                state: state.state_name(),
                event: event.name(),
            }),
        }
    }

    /// Applies a part-level event.
    ///
    /// Part events are only meaningful while parts are being uploaded.
    /// While paused they are dropped (their transport handles were
    /// cancelled); redundant queued/terminal repeats are idempotent.
    pub fn transition_part(&mut self, event: &UploadPartEvent) -> Result<(), MultipartError> {
        let MultipartUpload::Parts { parts, .. } = self else {
            if matches!(self, MultipartUpload::Paused { .. }) {
                return Ok(());
            }
            return Err(MultipartError::InvalidStateTransition {
                state: self.state_name(),
                event: event.name(),
            });
        };

        let part_number = event.part_number();
        let current = parts.find(part_number)?.clone();
        let bytes = current.bytes();

        let next = match (&current, event) {
            (UploadPart::Pending { .. }, UploadPartEvent::Queued { .. }) => {
                Some(UploadPart::Queued { bytes })
            }
            // A part already past pending treats a repeated queued event
            // as a no-op; dispatch bookkeeping may lag transport callbacks.
            (_, UploadPartEvent::Queued { .. }) => None,
            (
                UploadPart::Pending { .. } | UploadPart::Queued { .. },
                UploadPartEvent::Started { handle_id, .. },
            ) => Some(UploadPart::InProgress {
                bytes,
                bytes_transferred: 0,
                handle_id: *handle_id,
            }),
            (UploadPart::InProgress { .. }, UploadPartEvent::Started { .. }) => None,
            (
                UploadPart::InProgress { handle_id, .. },
                UploadPartEvent::Progress {
                    bytes_transferred, ..
                },
            ) => Some(UploadPart::InProgress {
                bytes,
                bytes_transferred: (*bytes_transferred).min(bytes),
                handle_id: *handle_id,
            }),
            (UploadPart::Completed { .. }, UploadPartEvent::Progress { .. }) => None,
            (
                UploadPart::Queued { .. } | UploadPart::InProgress { .. },
                UploadPartEvent::Completed { etag, .. },
            ) => Some(UploadPart::Completed {
                bytes,
                etag: etag.clone(),
            }),
            (UploadPart::Completed { .. }, UploadPartEvent::Completed { .. }) => None,
            (
                UploadPart::Pending { .. } | UploadPart::Queued { .. },
                UploadPartEvent::Failed { error, .. },
            ) => Some(UploadPart::Failed {
                bytes,
                bytes_transferred: 0,
                error: error.clone(),
            }),
            (
                UploadPart::InProgress {
                    bytes_transferred, ..
                },
                UploadPartEvent::Failed { error, .. },
            ) => Some(UploadPart::Failed {
                bytes,
                bytes_transferred: *bytes_transferred,
                error: error.clone(),
            }),
            (UploadPart::Failed { .. }, UploadPartEvent::Failed { .. }) => None,
            _ => {
                return Err(MultipartError::InvalidStateTransition {
                    state: "parts",
                    event: event.name(),
                });
            }
        };

        if let Some(part) = next {
            parts.set(part_number, part)?;
        }
        Ok(())
    }

    /// Marks the upload failed, keeping the first failure if already
    /// terminal.
    pub fn fail(&mut self, error: SharedError) {
        if matches!(
            self,
            MultipartUpload::Completed { .. }
                | MultipartUpload::Aborted { .. }
                | MultipartUpload::Failed { .. }
        ) {
            return;
        }
        let upload_id = self.upload_id().cloned();
        *self = MultipartUpload::Failed { upload_id, error };
    }

    pub fn upload_id(&self) -> Option<&UploadId> {
        match self {
            MultipartUpload::None => None,
            MultipartUpload::Created { upload_id, .. }
            | MultipartUpload::Parts { upload_id, .. }
            | MultipartUpload::Paused { upload_id, .. }
            | MultipartUpload::Completed { upload_id }
            | MultipartUpload::Aborting { upload_id, .. }
            | MultipartUpload::Aborted { upload_id } => Some(upload_id),
            MultipartUpload::Failed { upload_id, .. } => upload_id.as_ref(),
        }
    }

    pub fn upload_file(&self) -> Option<&UploadFile> {
        match self {
            MultipartUpload::Created { file, .. }
            | MultipartUpload::Parts { file, .. }
            | MultipartUpload::Paused { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn part_size(&self) -> Option<UploadPartSize> {
        match self {
            MultipartUpload::Parts { part_size, .. } | MultipartUpload::Paused { part_size, .. } => {
                Some(*part_size)
            }
            _ => None,
        }
    }

    pub fn parts(&self) -> Option<&UploadParts> {
        match self {
            MultipartUpload::Parts { parts, .. } | MultipartUpload::Paused { parts, .. } => {
                Some(parts)
            }
            _ => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, MultipartUpload::Paused { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MultipartUpload::Completed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            MultipartUpload::Aborting { .. } | MultipartUpload::Aborted { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MultipartUpload::Failed { .. })
    }

    pub fn has_pending_parts(&self) -> bool {
        self.parts().is_some_and(UploadParts::has_pending)
    }

    pub fn pending_part_numbers(&self) -> Vec<PartNumber> {
        self.parts()
            .map(UploadParts::pending_part_numbers)
            .unwrap_or_default()
    }

    pub fn in_progress_count(&self) -> usize {
        self.parts().map(UploadParts::in_progress_count).unwrap_or(0)
    }

    pub fn parts_completed(&self) -> bool {
        self.parts().is_some_and(UploadParts::all_completed)
    }

    pub fn parts_failed(&self) -> bool {
        self.parts().is_some_and(UploadParts::any_failed)
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.parts().map(UploadParts::progress)
    }

    /// Persistable snapshot of the part list.
    pub fn part_snapshots(&self) -> Option<Vec<PartSnapshot>> {
        self.parts().map(UploadParts::snapshots)
    }

    /// Checks that every part completed before the remote completion call.
    pub fn validate_for_completion(&self) -> Result<(), MultipartError> {
        match self.parts() {
            Some(parts) if parts.all_completed() => Ok(()),
            Some(parts) if parts.any_failed() => Err(MultipartError::PartsFailed),
            _ => Err(MultipartError::PartsNotDone),
        }
    }

    /// Rewinds every queued and in-progress part back to pending and
    /// returns the transport handles that were live, so the caller can
    /// cancel them. Used when pausing.
    pub fn rewind_active_parts(&mut self) -> Vec<HandleId> {
        let (MultipartUpload::Parts { parts, .. } | MultipartUpload::Paused { parts, .. }) = self
        else {
            return Vec::new();
        };

        let mut handles = Vec::new();
        for part_number in 1..=parts.len() as PartNumber {
            let part = parts
                .find(part_number)
                .cloned()
                .unwrap_or(UploadPart::Pending { bytes: 0 });
            match part {
                UploadPart::InProgress {
                    bytes, handle_id, ..
                } => {
                    handles.push(handle_id);
                    let _ = parts.set(part_number, UploadPart::Pending { bytes });
                }
                UploadPart::Queued { bytes } => {
                    let _ = parts.set(part_number, UploadPart::Pending { bytes });
                }
                _ => {}
            }
        }
        handles
    }

    /// Rewinds one failed part back to pending for a retry attempt.
    pub fn rewind_part(&mut self, part_number: PartNumber) -> Result<(), MultipartError> {
        let MultipartUpload::Parts { parts, .. } = self else {
            return Err(MultipartError::InvalidStateTransition {
                state: self.state_name(),
                event: "part retry",
            });
        };
        let bytes = parts.find(part_number)?.bytes();
        parts.set(part_number, UploadPart::Pending { bytes })?;
        Ok(())
    }
}
