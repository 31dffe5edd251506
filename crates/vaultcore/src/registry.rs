//! FileRegistry: user-visible file records and the dedup link/unlink protocol.
//!
//! Every mutating operation runs inside one immediate transaction, so a
//! link or unlink is all-or-nothing: no observer ever sees a file row
//! without its ledger reference or a decrement without its row delete.
//! Writers on the same database serialize on SQLite's write lock with a
//! bounded busy timeout; readers proceed under WAL.

use std::fs::File;
use std::io::Read;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};
use vaultcas::{BlobStore, CasError, ContentHash, StagedUpload};

use crate::db::{parse_datetime, Database};
use crate::error::{Result, StoreError};
use crate::gc;
use crate::ledger;
use crate::reconcile;
use crate::types::{
    FileId, FileRecord, ReconcileReport, SensitiveReport, StorageStats, SweepReport,
};
use crate::validate::UploadPolicy;

const FILE_COLUMNS: &str = "f.id, f.display_name, f.media_type, f.extension, f.content_id, \
                            f.sensitive_detected, f.sensitive_markers, f.sensitive_summary, \
                            f.created_at, COALESCE(b.byte_size, 0)";

pub(crate) fn hash_from_text(s: &str) -> rusqlite::Result<ContentHash> {
    s.parse().map_err(|_| rusqlite::Error::InvalidQuery)
}

pub(crate) fn parse_file_row(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    let content_id: String = row.get(4)?;
    let markers_json: String = row.get(6)?;

    Ok(FileRecord {
        id: FileId(row.get(0)?),
        display_name: row.get(1)?,
        media_type: row.get(2)?,
        extension: row.get(3)?,
        content_id: hash_from_text(&content_id)?,
        sensitive: SensitiveReport {
            detected: row.get(5)?,
            markers: serde_json::from_str(&markers_json).unwrap_or_default(),
            summary: row.get(7)?,
        },
        created_at: parse_datetime(row.get::<_, String>(8)?),
        byte_size: row.get(9)?,
    })
}

/// The registry owns the database, the blob store and the upload policy.
pub struct FileRegistry {
    db: Database,
    store: BlobStore,
    policy: UploadPolicy,
}

impl FileRegistry {
    pub fn new(db: Database, store: BlobStore, policy: UploadPolicy) -> Self {
        Self { db, store, policy }
    }

    /// Access the underlying blob store (download path, diagnostics).
    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Ingest a byte stream as a new logical file, without scanner output.
    pub fn link(
        &self,
        display_name: &str,
        media_type: &str,
        reader: impl Read,
    ) -> Result<FileRecord> {
        self.link_with_scan(display_name, media_type, reader, SensitiveReport::default())
    }

    /// Ingest a byte stream as a new logical file.
    ///
    /// The stream is staged and hashed in one pass, with the per-file
    /// size cap enforced inside that pass so an oversized stream is cut
    /// off at the cap rather than drained to disk first. The ledger
    /// acquire (dedup or create), the physical commit and the file-row
    /// insert all happen inside a single immediate transaction. Net
    /// effect on success: exactly one new file row, and exactly one blob
    /// row (new or pre-existing) with its ref_count up by one.
    /// Validation failures happen before any ledger mutation, and every
    /// failure before acquire drops the staged file.
    pub fn link_with_scan(
        &self,
        display_name: &str,
        media_type: &str,
        reader: impl Read,
        scan: SensitiveReport,
    ) -> Result<FileRecord> {
        let extension = self.policy.validate_name(display_name)?;

        let staged = self
            .store
            .stage_with_limit(reader, self.policy.max_upload_bytes)
            .map_err(|e| match e {
                CasError::TooLarge(limit) => StoreError::Validation(format!(
                    "file exceeds maximum allowed size ({limit} bytes)"
                )),
                other => StoreError::from(other),
            })?;
        if let Err(e) = self.policy.validate_size(staged.byte_size) {
            let _ = self.store.discard(&staged);
            return Err(e);
        }

        self.db.with_conn(|conn| {
            let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => tx,
                Err(e) => {
                    let _ = self.store.discard(&staged);
                    return Err(e.into());
                }
            };

            if let Err(e) = self.admit(&tx, &staged) {
                let _ = self.store.discard(&staged);
                return Err(e);
            }

            let entry = ledger::acquire(&tx, &self.store, staged)?;

            let record = FileRecord {
                id: FileId::new(),
                display_name: display_name.to_string(),
                media_type: media_type.to_string(),
                extension: extension.clone(),
                content_id: entry.content_id.clone(),
                byte_size: entry.byte_size,
                created_at: Utc::now(),
                sensitive: scan,
            };

            tx.execute(
                "INSERT INTO files (id, content_id, display_name, media_type, extension,
                                    sensitive_detected, sensitive_markers, sensitive_summary,
                                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.as_str(),
                    record.content_id.as_str(),
                    record.display_name,
                    record.media_type,
                    record.extension,
                    record.sensitive.detected,
                    serde_json::to_string(&record.sensitive.markers)
                        .unwrap_or_else(|_| "[]".to_string()),
                    record.sensitive.summary,
                    record.created_at.to_rfc3339(),
                ],
            )?;

            tx.commit()?;

            debug!(
                "linked {} as {} (blob {}, refs {})",
                record.display_name, record.id, entry.content_id, entry.ref_count
            );
            Ok(record)
        })
    }

    /// Pre-acquire admission check. The quota only grows when the
    /// content is genuinely new; a deduplicated upload always fits.
    fn admit(&self, conn: &Connection, staged: &StagedUpload) -> Result<()> {
        if ledger::peek(conn, &staged.content_id)?.is_none() {
            self.policy
                .validate_quota(ledger::physical_total(conn)?, staged.byte_size)?;
        }
        Ok(())
    }

    /// Remove a logical file, releasing its blob reference and garbage
    /// collecting the blob at the 1->0 crossing.
    pub fn unlink(&self, id: &FileId) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let content_id: Option<ContentHash> = tx
                .query_row(
                    "SELECT content_id FROM files WHERE id = ?1",
                    params![id.as_str()],
                    |row| {
                        let raw: String = row.get(0)?;
                        hash_from_text(&raw)
                    },
                )
                .optional()?;

            let Some(content_id) = content_id else {
                return Err(StoreError::NotFound(id.clone()));
            };

            unlink_row(&tx, &self.store, id.as_str(), &content_id)?;
            tx.commit()?;

            debug!("unlinked file {id}");
            Ok(())
        })
    }

    /// Look up a single file record.
    pub fn get(&self, id: &FileId) -> Result<FileRecord> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 LEFT JOIN blobs b ON b.content_id = f.content_id
                 WHERE f.id = ?1"
            ))?;

            stmt.query_row(params![id.as_str()], parse_file_row)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(id.clone()))
        })
    }

    /// All file records, newest first.
    pub fn list(&self) -> Result<Vec<FileRecord>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files f
                 LEFT JOIN blobs b ON b.content_id = f.content_id
                 ORDER BY f.created_at DESC, f.id DESC"
            ))?;

            let records = stmt
                .query_map([], parse_file_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    /// Open a file's content for reading (download path).
    ///
    /// `BlobMissing` here means the ledger and the filesystem have
    /// diverged; the record itself is still intact.
    pub fn open(&self, id: &FileId) -> Result<(FileRecord, File)> {
        let record = self.get(id)?;
        let file = self.store.open(&record.content_id).map_err(StoreError::from)?;
        Ok((record, file))
    }

    /// Collapse duplicate file records per blob, keeping the oldest.
    ///
    /// Runs in one transaction and may block link/unlink for its
    /// duration; intended as an explicit, infrequent maintenance call.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let report = reconcile::run(&tx, &self.store)?;
            tx.commit()?;
            Ok(report)
        })
    }

    /// Look up a ledger entry by content id.
    pub fn blob(&self, content_id: &ContentHash) -> Result<Option<crate::types::BlobEntry>> {
        self.db.with_conn(|conn| ledger::peek(conn, content_id))
    }

    /// Storage accounting: logical vs physical bytes.
    pub fn stats(&self) -> Result<StorageStats> {
        self.db.with_conn(|conn| ledger::stats(conn))
    }

    /// Reclaim the crash debris no hot path revisits: zero-ref ledger
    /// rows, committed blob files the ledger has no row for (a link
    /// whose transaction rolled back after the physical commit), and
    /// leftover staging files from interrupted uploads.
    ///
    /// Only safe while no uploads are in flight: a concurrent link's
    /// freshly committed bytes look exactly like a stray blob until its
    /// transaction commits.
    pub fn sweep_orphans(&self) -> Result<SweepReport> {
        let zero_ref_rows = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let swept = ledger::sweep_orphans(&tx, &self.store)?;
            tx.commit()?;
            Ok(swept)
        })?;

        let mut stray_blobs = 0;
        for hash in self.store.list_blobs()? {
            if self.db.with_conn(|conn| ledger::peek(conn, &hash))?.is_none() {
                self.store.remove(&hash)?;
                stray_blobs += 1;
            }
        }

        let staging_entries = self.store.clear_staging()?;

        if stray_blobs > 0 || staging_entries > 0 {
            info!("swept {stray_blobs} stray blob(s) and {staging_entries} staging file(s)");
        }

        Ok(SweepReport {
            zero_ref_rows,
            stray_blobs,
            staging_entries,
        })
    }
}

/// Shared unlink step: delete the file row, release the reference, and
/// collect the blob when this was the last one. Must run inside the
/// caller's transaction.
pub(crate) fn unlink_row(
    conn: &Connection,
    store: &BlobStore,
    file_id: &str,
    content_id: &ContentHash,
) -> Result<()> {
    conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;

    match ledger::release(conn, content_id)? {
        None => {
            // Ledger row already gone: a prior partial failure. The file
            // row is deleted either way; converge instead of crashing.
            warn!("release for unknown blob {content_id} while unlinking {file_id}");
        }
        Some(entry) if entry.ref_count == 0 => {
            gc::collect(conn, store, &entry)?;
        }
        Some(_) => {}
    }

    Ok(())
}
