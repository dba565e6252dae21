//! Persisted transfer-state format for the barge engine.
//!
//! One descriptor document is written per transfer so that in-flight
//! transfers can be rediscovered after the hosting process restarts. The
//! types here are pure serde data — all file I/O lives in `barge-engine`.

mod descriptor;
mod types;

pub use descriptor::{PartSnapshot, TransferDescriptor, UploadFileDescriptor};
pub use types::{
    HandleId, PartNumber, RawTransferKind, TransferId, TransferProgress, TransferStatus, UploadId,
};
