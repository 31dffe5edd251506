//! Content Addressable Storage (CAS) for filevault.
//!
//! Physical half of the deduplicating store: every distinct payload is
//! written exactly once under a path derived from its 256-bit BLAKE3
//! hash. The transactional half (reference counts, file records, GC)
//! lives in `vaultcore` and treats this crate as its storage device.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Cursor;
//! use vaultcas::{BlobStore, BlobStoreConfig};
//!
//! // Create from environment (reads FILEVAULT_CAS_PATH)
//! let config = BlobStoreConfig::from_env().unwrap();
//! let store = BlobStore::new(config).unwrap();
//!
//! // Stage an upload: hashed while written, invisible to readers
//! let staged = store.stage(Cursor::new(b"Hello, World!".to_vec())).unwrap();
//! println!("content id: {} ({} bytes)", staged.content_id, staged.byte_size);
//!
//! // Publish it atomically at its content-addressed path
//! let hash = staged.content_id.clone();
//! store.commit(&staged).unwrap();
//!
//! // Read it back
//! let file = store.open(&hash).unwrap();
//! ```
//!
//! # Guarantees
//!
//! - Staged bytes never become reader-visible until `commit`, which is
//!   a single atomic rename (copy+delete only across filesystems).
//! - Committing content that already exists discards the staged copy;
//!   that is the expected dedup path, not an error.
//! - `remove` is idempotent and tolerates already-missing files.

pub mod config;
pub mod error;
pub mod hash;
pub mod staging;
pub mod store;

// Re-exports for convenience
pub use config::BlobStoreConfig;
pub use error::CasError;
pub use hash::{ContentHash, ContentHasher, HashError};
pub use staging::{StagedBlob, StagedUpload, StagingId};
pub use store::BlobStore;
