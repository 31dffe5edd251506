//! Blob store configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `FILEVAULT_CAS_PATH`: Base path for blob storage
//! - `FILEVAULT_CAS_NOSYNC`: Set to "true" to skip fsync on staged writes
//!
//! Default path: `~/.filevault/cas`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration for the content-addressed blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Base path for blob storage.
    /// Committed blobs live in `{base_path}/blobs/`, in-flight uploads
    /// in `{base_path}/staging/`.
    pub base_path: PathBuf,

    /// Whether to fsync staged files before they become eligible for commit.
    /// Disable for faster test runs; keep on for durability.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            base_path: default_cas_path(),
            sync_writes: true,
        }
    }
}

/// Get the default blob store path (~/.filevault/cas).
fn default_cas_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".filevault").join("cas"))
        .unwrap_or_else(|| PathBuf::from(".filevault/cas"))
}

impl BlobStoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let base_path = env::var("FILEVAULT_CAS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cas_path());

        let nosync = env::var("FILEVAULT_CAS_NOSYNC")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            base_path,
            sync_writes: !nosync,
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[blobstore]` section:
    /// ```toml
    /// [blobstore]
    /// base_path = "/srv/filevault/cas"
    /// sync_writes = true
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

        if let Some(section) = table.get("blobstore") {
            let config: BlobStoreConfig = section
                .clone()
                .try_into()
                .context("failed to parse [blobstore] section")?;
            Ok(config)
        } else {
            Self::from_env()
        }
    }

    /// Create a config with a specific base path.
    pub fn with_base_path(path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: path.into(),
            sync_writes: true,
        }
    }

    /// Get the committed blobs directory path.
    pub fn blobs_dir(&self) -> PathBuf {
        self.base_path.join("blobs")
    }

    /// Get the staging directory path.
    pub fn staging_dir(&self) -> PathBuf {
        self.base_path.join("staging")
    }
}
