//! Staging: private temp files for in-flight uploads.
//!
//! An upload is written to the staging area under a random ID while its
//! content hash is still unknown. Bytes pass through a [`ContentHasher`]
//! on the way to disk, so one read of the source stream produces both
//! the staged file and its `(content_id, byte_size)`. Nothing in the
//! staging area is ever visible to readers; a staged upload either gets
//! committed (renamed into the blobs directory) or discarded.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── blobs/
//! │   └── ab/cde123...     # Committed content
//! └── staging/
//!     └── ef/gh5678...     # In-flight uploads
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::error::CasError;
use crate::hash::{ContentHash, ContentHasher};

/// A staging ID - same shard-friendly hex format as ContentHash but
/// generated from random data, since the content hash isn't known yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingId(String);

impl StagingId {
    /// Generate a new random staging ID.
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let hash_bytes = blake3::hash(uuid.as_bytes());
        Self(hex::encode(hash_bytes.as_bytes()))
    }

    /// Get the first 2 characters (used for directory sharding).
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Get the remainder after the prefix (used as filename).
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    /// Get the full ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open staging file being written incrementally.
///
/// Every chunk written also feeds the running digest. Call `finish()`
/// when the stream is exhausted to close the file and obtain the
/// computed identity.
#[derive(Debug)]
pub struct StagedBlob {
    id: StagingId,
    path: PathBuf,
    file: Option<File>,
    hasher: ContentHasher,
    sync_on_finish: bool,
}

impl StagedBlob {
    /// Create a new staging file at the given path.
    pub(crate) fn create(id: StagingId, path: PathBuf, sync_on_finish: bool) -> Result<Self, CasError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;

        Ok(Self {
            id,
            path,
            file: Some(file),
            hasher: ContentHasher::new(),
            sync_on_finish,
        })
    }

    /// Get the staging ID.
    pub fn id(&self) -> &StagingId {
        &self.id
    }

    /// Get the path to the staging file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_seen()
    }

    /// Write a chunk: disk and digest in one pass.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let Some(ref mut file) = self.file {
            file.write_all(data)?;
            self.hasher.update(data);
            Ok(())
        } else {
            Err(io::Error::other("staging file already closed"))
        }
    }

    /// Close the file and finalize the digest.
    pub fn finish(self) -> Result<StagedUpload, CasError> {
        let StagedBlob {
            id,
            path,
            file,
            hasher,
            sync_on_finish,
        } = self;

        if let Some(mut file) = file {
            file.flush()?;
            if sync_on_finish {
                file.sync_all()?;
            }
        }

        let (content_id, byte_size) = hasher.finalize();

        Ok(StagedUpload {
            id,
            path,
            content_id,
            byte_size,
        })
    }
}

/// A fully staged upload: bytes on disk in the staging area, identity known.
///
/// Hand this to `BlobStore::commit` to publish it, or `BlobStore::discard`
/// to drop it (aborted upload, or the content turned out to already exist).
#[derive(Debug)]
pub struct StagedUpload {
    /// The random staging ID.
    pub id: StagingId,
    /// Path of the staged file.
    pub path: PathBuf,
    /// Content hash computed while streaming.
    pub content_id: ContentHash,
    /// Exact payload length in bytes.
    pub byte_size: u64,
}
