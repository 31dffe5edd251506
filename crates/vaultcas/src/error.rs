//! Error type for blob store operations.

use crate::hash::ContentHash;
use thiserror::Error;

/// Errors surfaced by the physical blob store.
///
/// `Missing` is deliberately distinct from `Io`: a ledger row can claim
/// content that is no longer on disk (prior partial failure), and
/// callers treat that as a recoverable integrity warning rather than a
/// device error.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob {0} is missing from disk")]
    Missing(ContentHash),

    #[error("staged stream exceeded the {0} byte limit")]
    TooLarge(u64),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
