//! Reference-counted dedup ledger and file registry for filevault.
//!
//! The transactional half of the deduplicating store. `vaultcas` owns
//! the bytes; this crate owns the bookkeeping:
//!
//! - **ledger**: one row per distinct blob, with a ref_count equal to
//!   the number of file records pointing at it. Acquire/release run
//!   inside the caller's transaction.
//! - **registry**: user-visible file records; `link` streams an upload
//!   in (dedup or create), `unlink` removes one and garbage collects
//!   the blob at the last reference.
//! - **gc**: synchronous, event-driven blob reclamation at the 1->0
//!   crossing. Never on a timer.
//! - **reconcile**: batch collapse of duplicate file records, keeping
//!   the oldest per blob.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Cursor;
//! use vaultcas::BlobStore;
//! use vaultcore::{Database, FileRegistry, UploadPolicy};
//!
//! let store = BlobStore::at_path("/srv/filevault/cas").unwrap();
//! let db = Database::open("/srv/filevault/vault.db").unwrap();
//! let registry = FileRegistry::new(db, store, UploadPolicy::default());
//!
//! let record = registry
//!     .link("notes.txt", "text/plain", Cursor::new(b"hello".to_vec()))
//!     .unwrap();
//!
//! let stats = registry.stats().unwrap();
//! println!("physical bytes: {}", stats.physical_total);
//!
//! registry.unlink(&record.id).unwrap();
//! ```
//!
//! # Consistency
//!
//! A process restart reloads all state from the database; ref_count
//! accuracy survives because every mutation is transactional. What a
//! crash can leave behind — a zero-ref ledger row, committed bytes with
//! no row, a file stuck in staging — is reclaimed by
//! `FileRegistry::sweep_orphans`.

pub mod db;
pub mod error;
pub mod gc;
pub mod ledger;
mod reconcile;
pub mod registry;
pub mod types;
pub mod validate;

// Re-exports for convenience
pub use db::Database;
pub use error::{Result, StoreError};
pub use registry::FileRegistry;
pub use types::{
    BlobEntry, FileId, FileRecord, ReconcileReport, SensitiveReport, StorageStats, SweepReport,
};
pub use validate::UploadPolicy;
