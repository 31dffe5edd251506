//! Error taxonomy for the dedup store.
//!
//! Each variant maps to a distinct caller policy: `Validation` and
//! `NotFound` are plain client errors, `Io` is transient and retryable
//! at the caller's discretion, `BlobMissing` is a recoverable integrity
//! warning, and `UnknownBlob` marks a prior partial failure that the
//! registry degrades to a logged no-op rather than propagating.

use crate::types::FileId;
use thiserror::Error;
use vaultcas::{CasError, ContentHash};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient storage device failure during stage/commit/read.
    /// Not retried internally; the caller decides retry policy.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// A ledger row claims content that is absent from disk.
    #[error("blob {0} is missing from disk")]
    BlobMissing(ContentHash),

    /// A release found no ledger row for the content id. Indicates a
    /// prior partial failure, not a currently-corrupting one.
    #[error("no ledger entry for blob {0}")]
    UnknownBlob(ContentHash),

    /// No file record with the given id.
    #[error("file {0} not found")]
    NotFound(FileId),

    /// Rejected before any ledger mutation took place.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl From<CasError> for StoreError {
    fn from(err: CasError) -> Self {
        match err {
            CasError::Missing(hash) => StoreError::BlobMissing(hash),
            CasError::TooLarge(limit) => StoreError::Validation(format!(
                "file exceeds maximum allowed size ({limit} bytes)"
            )),
            CasError::Io(e) => StoreError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
