//! Part sizing, part bookkeeping and the multipart-upload state machine.
//!
//! Everything here is pure computation: no I/O, no async, no callbacks.
//! The live engine (`barge-engine`) drives these state machines from
//! transport events and persists their snapshots between process runs.

mod multipart;
mod part_size;
mod parts;
mod upload_file;

pub use multipart::{MultipartError, MultipartUpload, MultipartUploadEvent, UploadPartEvent};
pub use part_size::UploadPartSize;
pub use parts::{UploadPart, UploadParts};
pub use upload_file::UploadFile;

/// Smallest allowed part size: 5 MiB.
pub const MINIMUM_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest allowed part size: 5 GiB.
pub const MAXIMUM_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Part size the doubling search starts from.
pub const DEFAULT_PART_SIZE: u64 = MINIMUM_PART_SIZE;

/// Largest allowed number of parts in one multipart upload.
pub const MAXIMUM_PART_COUNT: u64 = 10_000;

/// Smallest allowed object size: one byte.
pub const MINIMUM_OBJECT_SIZE: u64 = 1;

/// Largest allowed object size: 5 TiB.
pub const MAXIMUM_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Shared, cloneable cause of a part or upload failure.
pub type SharedError = std::sync::Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by part sizing and part bookkeeping.
///
/// All of these are validation errors raised synchronously at
/// construction time; the caller is expected to fix its inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartError {
    #[error("object size {0} is below the 1 byte minimum")]
    BelowMinimumObjectSize(u64),

    #[error("object size {0} exceeds the 5 TiB maximum")]
    ExceedsMaximumObjectSize(u64),

    #[error("part size {0} is below the 5 MiB minimum")]
    BelowMinimumPartSize(u64),

    #[error("part size {0} exceeds the 5 GiB maximum")]
    OverMaximumPartSize(u64),

    #[error("no valid part size fits object size {0} within the part count limit")]
    ExceedsSupportedFileSize(u64),

    #[error("part count below lower limit")]
    PartCountBelowLowerLimit,

    #[error("part count {0} exceeds the 10,000 part limit")]
    PartCountOverUpperLimit(u64),

    #[error("invalid part number {0}")]
    InvalidPartNumber(barge_protocol::PartNumber),
}
