//! BlobStore: filesystem-backed content-addressed storage with directory sharding.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── blobs/
//! │   ├── ab/
//! │   │   └── cde123...  # Content file (remainder of hash)
//! │   └── 12/
//! │       └── 3456789...
//! └── staging/
//!     └── ef/
//!         └── gh5678...  # In-flight upload (random ID)
//! ```
//!
//! The path of a blob is a pure function of its content hash, so commit
//! for identical content is naturally idempotent: the second committer
//! finds the destination already present and just drops its staged copy.

use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use crate::config::BlobStoreConfig;
use crate::error::CasError;
use crate::hash::ContentHash;
use crate::staging::{StagedBlob, StagedUpload, StagingId};

const STAGE_CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-based content-addressed blob store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    config: BlobStoreConfig,
}

impl BlobStore {
    /// Create a new BlobStore with the given configuration.
    ///
    /// Creates the blobs and staging directories if they don't exist.
    pub fn new(config: BlobStoreConfig) -> Result<Self, CasError> {
        fs::create_dir_all(config.blobs_dir())?;
        fs::create_dir_all(config.staging_dir())?;
        Ok(Self { config })
    }

    /// Create a BlobStore at a specific path.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self, CasError> {
        Self::new(BlobStoreConfig::with_base_path(path))
    }

    /// Get the configuration.
    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    /// Absolute path where a committed blob lives (whether or not it exists).
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.config
            .blobs_dir()
            .join(hash.prefix())
            .join(hash.remainder())
    }

    /// Relative storage path recorded in the ledger: `{prefix}/{remainder}`.
    pub fn rel_path(hash: &ContentHash) -> String {
        format!("{}/{}", hash.prefix(), hash.remainder())
    }

    fn staging_path(&self, id: &StagingId) -> PathBuf {
        self.config
            .staging_dir()
            .join(id.prefix())
            .join(id.remainder())
    }

    /// Stream a reader into the staging area, hashing in the same pass.
    ///
    /// The returned upload is invisible to readers until committed. On a
    /// read error the partial staging file is removed before the error
    /// propagates.
    pub fn stage(&self, reader: impl Read) -> Result<StagedUpload, CasError> {
        self.stage_with_limit(reader, None)
    }

    /// Like [`stage`](Self::stage), but stops reading the moment the
    /// running total would pass `max_bytes`.
    ///
    /// An oversized source never lands in staging in full: the partial
    /// file is removed and `CasError::TooLarge` returned as soon as the
    /// cap is crossed, without draining the rest of the stream.
    pub fn stage_with_limit(
        &self,
        mut reader: impl Read,
        max_bytes: Option<u64>,
    ) -> Result<StagedUpload, CasError> {
        let id = StagingId::new();
        let path = self.staging_path(&id);
        let mut staged = StagedBlob::create(id, path, self.config.sync_writes)?;

        let mut buf = [0u8; STAGE_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(staged.path());
                    return Err(e.into());
                }
            };
            if let Some(max) = max_bytes {
                if staged.bytes_written() + n as u64 > max {
                    let _ = fs::remove_file(staged.path());
                    return Err(CasError::TooLarge(max));
                }
            }
            if let Err(e) = staged.write(&buf[..n]) {
                let _ = fs::remove_file(staged.path());
                return Err(e.into());
            }
        }

        staged.finish()
    }

    /// Atomically publish a staged upload at its content-addressed location.
    ///
    /// Uses rename (O(1) on same filesystem) with a copy+delete fallback
    /// for cross-filesystem staging. If the destination already exists a
    /// concurrent upload of identical content won the race; the staged
    /// duplicate is discarded and the existing path returned. That is the
    /// expected dedup case, not an error.
    pub fn commit(&self, staged: &StagedUpload) -> Result<PathBuf, CasError> {
        let dest = self.blob_path(&staged.content_id);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if dest.exists() {
            fs::remove_file(&staged.path)?;
            return Ok(dest);
        }

        match fs::rename(&staged.path, &dest) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                // Cross-filesystem: fall back to copy + delete
                fs::copy(&staged.path, &dest)?;
                fs::remove_file(&staged.path)?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(dest)
    }

    /// Drop a staged upload without committing it.
    ///
    /// Used for aborted uploads and for the dedup path where the ledger
    /// already knew the content. Idempotent; absence is not an error.
    pub fn discard(&self, staged: &StagedUpload) -> Result<(), CasError> {
        match fs::remove_file(&staged.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a committed blob for reading.
    ///
    /// Fails with `CasError::Missing` if the physical file is absent,
    /// which callers treat as a data-integrity warning rather than a
    /// fatal device error.
    pub fn open(&self, hash: &ContentHash) -> Result<File, CasError> {
        let path = self.blob_path(hash);
        match File::open(&path) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CasError::Missing(hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a committed blob exists on disk.
    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).exists()
    }

    /// Best-effort delete of a committed blob. Absence is not an error.
    ///
    /// Also prunes the shard directory if the removal left it empty.
    pub fn remove(&self, hash: &ContentHash) -> Result<(), CasError> {
        let path = self.blob_path(hash);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            // Fails when the shard still holds other blobs; that's fine.
            let _ = fs::remove_dir(parent);
        }

        Ok(())
    }

    /// Hashes of every committed blob on disk.
    ///
    /// Reconstructed from the sharded layout; entries that don't parse
    /// as a content hash (foreign files) are skipped. Maintenance path,
    /// used to find bytes the ledger no longer accounts for.
    pub fn list_blobs(&self) -> Result<Vec<ContentHash>, CasError> {
        let mut hashes = Vec::new();

        for shard in fs::read_dir(self.config.blobs_dir())? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name();
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let full = format!(
                    "{}{}",
                    prefix.to_string_lossy(),
                    entry.file_name().to_string_lossy()
                );
                if let Ok(hash) = full.parse() {
                    hashes.push(hash);
                }
            }
        }

        Ok(hashes)
    }

    /// Delete every file in the staging area, returning how many went.
    ///
    /// Anything still in staging belongs to an upload that never reached
    /// commit or discard. Only safe while no uploads are in flight.
    pub fn clear_staging(&self) -> Result<usize, CasError> {
        let mut removed = 0;

        for shard in fs::read_dir(self.config.staging_dir())? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                fs::remove_file(entry?.path())?;
                removed += 1;
            }
            let _ = fs::remove_dir(shard.path());
        }

        Ok(removed)
    }
}
