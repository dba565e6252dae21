//! Live transfer engine for resumable object-store transfers.
//!
//! A [`TransferTask`] is the live identity of one upload or download,
//! registered in a [`TransferDatabase`] that persists a descriptor per
//! transfer so interrupted transfers can be rediscovered after a process
//! restart. Large uploads run through a [`MultipartUploadSession`] which
//! splits the source file into parts and drives their concurrent,
//! ordered completion against an external transport layer.

mod database;
mod error;
mod events;
mod session;
mod task;
mod transport;

pub use database::{RecoveredTransfer, TransferDatabase};
pub use error::TransferError;
pub use events::{
    DownloadEventHandler, MultipartUploadEventHandler, TransferEvent, TransferKind,
    UploadEventHandler,
};
pub use session::{MultipartUploadSession, RetryPolicy, default_concurrent_limit};
pub use task::{TransferOptions, TransferProxy, TransferTask};
pub use transport::{
    ActiveHandlesFuture, MultipartUploadClient, PartUploadRequest, TransferStore, TransportHandle,
    TransportLister, etag_from_headers,
};
