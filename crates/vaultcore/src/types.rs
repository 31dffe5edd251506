//! Core types: file records, ledger entries, stats and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vaultcas::ContentHash;

/// Opaque unique identifier for a user-visible file record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of the external sensitive-content scanner.
///
/// The core stores this verbatim and never interprets it; the scanner
/// collaborator owns the semantics of markers and summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveReport {
    pub detected: bool,
    pub markers: Vec<String>,
    pub summary: String,
}

/// A user-visible file. Many records may share one blob; each record
/// holds exactly one ledger reference for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub display_name: String,
    pub media_type: String,
    /// Lowercased extension derived from the display name, without the
    /// dot, truncated to 10 chars. Empty when the name has none.
    pub extension: String,
    pub content_id: ContentHash,
    /// Size of the referenced blob. A property of the content, so every
    /// record sharing a blob reports the same value.
    pub byte_size: u64,
    pub created_at: DateTime<Utc>,
    pub sensitive: SensitiveReport,
}

/// A ledger entry: one unique content payload and its reference count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobEntry {
    pub content_id: ContentHash,
    pub byte_size: u64,
    /// Relative path under the blob root: `{prefix}/{remainder}`.
    pub storage_path: String,
    pub ref_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage accounting across the registry and ledger.
///
/// `logical_total` counts shared blobs once per referencing file record;
/// `physical_total` counts each blob once. The difference is what
/// deduplication saved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub logical_total: u64,
    pub physical_total: u64,
    pub savings: u64,
    pub dedup_ratio: f64,
}

impl StorageStats {
    pub fn compute(logical_total: u64, physical_total: u64) -> Self {
        let savings = logical_total.saturating_sub(physical_total);
        let dedup_ratio = if logical_total > 0 {
            let ratio = 1.0 - (physical_total as f64 / logical_total as f64);
            (ratio * 1e6).round() / 1e6
        } else {
            0.0
        };

        Self {
            logical_total,
            physical_total,
            savings,
            dedup_ratio,
        }
    }
}

/// What a maintenance sweep reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Ledger rows stuck at ref_count 0.
    pub zero_ref_rows: usize,
    /// Committed blob files with no ledger row.
    pub stray_blobs: usize,
    /// Staging files left behind by interrupted uploads.
    pub staging_entries: usize,
}

/// Outcome of a duplicate-reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Number of duplicate file records removed.
    pub removed_count: usize,
    /// Content ids whose groups were collapsed.
    pub affected_content_ids: Vec<ContentHash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_uniqueness() {
        assert_ne!(FileId::new(), FileId::new());
    }

    #[test]
    fn test_stats_no_duplication() {
        let stats = StorageStats::compute(100, 100);
        assert_eq!(stats.savings, 0);
        assert_eq!(stats.dedup_ratio, 0.0);
    }

    #[test]
    fn test_stats_half_duplicated() {
        let stats = StorageStats::compute(10, 5);
        assert_eq!(stats.savings, 5);
        assert_eq!(stats.dedup_ratio, 0.5);
    }

    #[test]
    fn test_stats_empty_store() {
        let stats = StorageStats::compute(0, 0);
        assert_eq!(stats.logical_total, 0);
        assert_eq!(stats.physical_total, 0);
        assert_eq!(stats.savings, 0);
        assert_eq!(stats.dedup_ratio, 0.0);
    }

    #[test]
    fn test_stats_ratio_rounded_to_six_places() {
        let stats = StorageStats::compute(3, 2);
        assert_eq!(stats.dedup_ratio, 0.333333);
    }

    #[test]
    fn test_sensitive_report_serde() {
        let report = SensitiveReport {
            detected: true,
            markers: vec!["ssn".to_string(), "dob".to_string()],
            summary: "2 markers found".to_string(),
        };

        let json = serde_json::to_string(&report).unwrap();
        let restored: SensitiveReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, restored);
    }
}
