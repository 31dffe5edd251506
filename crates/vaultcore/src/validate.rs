//! Upload validation policy.
//!
//! Checks run before any ledger mutation, so a rejected upload has no
//! observable effect on reference counts. The storage quota is checked
//! separately inside the link transaction, where the current physical
//! total is authoritative.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_TOTAL_STORAGE_LIMIT: u64 = 200 * 1024 * 1024;
const MAX_EXTENSION_LEN: usize = 10;

/// Policy applied to every `link` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Per-file size ceiling. `None` disables the check.
    pub max_upload_bytes: Option<u64>,

    /// Ceiling on total physical bytes across all blobs. `None`
    /// disables the check.
    pub total_storage_limit: Option<u64>,

    /// Extensions rejected outright (lowercase, no dot).
    pub blocked_extensions: Vec<String>,

    /// When non-empty, only these extensions are accepted.
    pub allowed_extensions: Vec<String>,

    /// Whether zero-length uploads are accepted.
    pub allow_empty: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
            total_storage_limit: Some(DEFAULT_TOTAL_STORAGE_LIMIT),
            blocked_extensions: ["exe", "bat", "cmd", "com", "scr", "vbs", "msi", "dll"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_extensions: Vec::new(),
            allow_empty: true,
        }
    }
}

impl UploadPolicy {
    /// A policy with every check disabled.
    pub fn unrestricted() -> Self {
        Self {
            max_upload_bytes: None,
            total_storage_limit: None,
            blocked_extensions: Vec::new(),
            allowed_extensions: Vec::new(),
            allow_empty: true,
        }
    }

    /// Validate the display name and return the derived extension:
    /// lowercase, no dot, truncated to 10 chars, empty if absent.
    pub fn validate_name(&self, display_name: &str) -> Result<String> {
        if display_name.trim().is_empty() {
            return Err(StoreError::Validation("filename is required".to_string()));
        }

        let extension = extract_extension(display_name);

        if !extension.is_empty() {
            if self
                .blocked_extensions
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(&extension))
            {
                return Err(StoreError::Validation(format!(
                    "file extension \"{extension}\" is not allowed for security reasons"
                )));
            }

            if !self.allowed_extensions.is_empty()
                && !self
                    .allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
            {
                return Err(StoreError::Validation(format!(
                    "file extension \"{extension}\" is not allowed. Allowed extensions: {}",
                    self.allowed_extensions.join(", ")
                )));
            }
        }

        Ok(extension)
    }

    /// Validate a staged upload's byte count.
    pub fn validate_size(&self, byte_size: u64) -> Result<()> {
        if byte_size == 0 && !self.allow_empty {
            return Err(StoreError::Validation(
                "empty uploads are not allowed".to_string(),
            ));
        }

        if let Some(max) = self.max_upload_bytes {
            if byte_size > max {
                return Err(StoreError::Validation(format!(
                    "file size ({byte_size} bytes) exceeds maximum allowed size ({max} bytes)"
                )));
            }
        }

        Ok(())
    }

    /// Check the storage quota against the current physical total.
    pub fn validate_quota(&self, physical_total: u64, incoming_bytes: u64) -> Result<()> {
        if let Some(limit) = self.total_storage_limit {
            if physical_total.saturating_add(incoming_bytes) > limit {
                return Err(StoreError::Validation(format!(
                    "storage limit exceeded: {physical_total} bytes used of {limit}, \
                     this file ({incoming_bytes} bytes) would exceed the limit"
                )));
            }
        }
        Ok(())
    }
}

/// Extension of a filename: part after the last dot, unless the dot is
/// the first character (dotfiles have no extension).
fn extract_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => {
            let ext = name[pos + 1..].to_lowercase();
            ext.chars().take(MAX_EXTENSION_LEN).collect()
        }
        _ => String::new(),
    }
}
