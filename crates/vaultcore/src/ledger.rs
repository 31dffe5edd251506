//! ReferenceLedger: the reference-counted blob table.
//!
//! Every function here runs against a connection that the caller has
//! already placed inside an immediate transaction; the registry composes
//! acquire/release with its own row changes so each user-visible
//! operation is all-or-nothing. Writers on the same database are
//! mutually exclusive under SQLite's write lock, which is what makes
//! the ref_count arithmetic safe (no lost updates).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use vaultcas::{BlobStore, ContentHash, StagedUpload};

use crate::db::parse_datetime;
use crate::error::{Result, StoreError};
use crate::gc;
use crate::types::{BlobEntry, StorageStats};

pub(crate) fn parse_blob_row(row: &rusqlite::Row) -> rusqlite::Result<BlobEntry> {
    let content_id: String = row.get(0)?;
    let content_id = content_id
        .parse::<ContentHash>()
        .map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(BlobEntry {
        content_id,
        byte_size: row.get(1)?,
        storage_path: row.get(2)?,
        ref_count: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        updated_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

const BLOB_COLUMNS: &str = "content_id, byte_size, storage_path, ref_count, created_at, updated_at";

/// Take a reference on the staged content, deduplicating against the
/// ledger.
///
/// Known content: bump ref_count and discard the staged duplicate.
/// New content: insert the row at ref_count 0, commit the physical
/// bytes, then bump to 1 — all inside the caller's transaction. A crash
/// between the physical commit and the bump leaves a zero-ref row,
/// which `sweep_orphans` later reclaims; it can never leave a reference
/// without backing bytes.
///
/// The insert uses `ON CONFLICT DO NOTHING` so a racing writer that got
/// there first simply redirects us to the increment path (optimistic
/// resolution; exactly one row wins).
pub fn acquire(conn: &Connection, store: &BlobStore, staged: StagedUpload) -> Result<BlobEntry> {
    let content_id = staged.content_id.clone();
    let now = Utc::now().to_rfc3339();

    let inserted = conn.execute(
        "INSERT INTO blobs (content_id, byte_size, storage_path, ref_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?4)
         ON CONFLICT(content_id) DO NOTHING",
        params![
            content_id.as_str(),
            staged.byte_size,
            BlobStore::rel_path(&content_id),
            now
        ],
    )?;

    if inserted == 0 {
        // Ledger already knows this content; the staged bytes duplicate it.
        increment(conn, &content_id, &now)?;
        store.discard(&staged)?;
    } else {
        match store.commit(&staged) {
            Ok(_) => increment(conn, &content_id, &now)?,
            Err(e) => {
                // Transaction rolls back the insert; drop the staged file too.
                let _ = store.discard(&staged);
                return Err(e.into());
            }
        }
    }

    peek(conn, &content_id)?.ok_or(StoreError::UnknownBlob(content_id))
}

fn increment(conn: &Connection, content_id: &ContentHash, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE blobs SET ref_count = ref_count + 1, updated_at = ?2 WHERE content_id = ?1",
        params![content_id.as_str(), now],
    )?;
    Ok(())
}

/// Drop one reference. Returns the updated entry, or `None` when no
/// ledger row exists (a prior partial failure; callers log and move on).
///
/// The decrement is guarded so ref_count never goes below zero: a
/// release against an already-zero row is a no-op, not a crash.
pub fn release(conn: &Connection, content_id: &ContentHash) -> Result<Option<BlobEntry>> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE blobs SET ref_count = ref_count - 1, updated_at = ?2
         WHERE content_id = ?1 AND ref_count > 0",
        params![content_id.as_str(), now],
    )?;

    peek(conn, content_id)
}

/// Look up a ledger entry without touching it.
pub fn peek(conn: &Connection, content_id: &ContentHash) -> Result<Option<BlobEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOB_COLUMNS} FROM blobs WHERE content_id = ?1"
    ))?;

    Ok(stmt
        .query_row(params![content_id.as_str()], parse_blob_row)
        .optional()?)
}

/// Sum of blob sizes counted once per referencing file record.
pub fn logical_total(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(b.byte_size), 0)
         FROM files f JOIN blobs b ON b.content_id = f.content_id",
        [],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

/// Sum of blob sizes counted once per distinct blob (actual disk usage).
pub fn physical_total(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(byte_size), 0) FROM blobs",
        [],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

/// Storage accounting snapshot.
pub fn stats(conn: &Connection) -> Result<StorageStats> {
    Ok(StorageStats::compute(
        logical_total(conn)?,
        physical_total(conn)?,
    ))
}

/// Reclaim blobs stranded at ref_count 0 by a crash between the
/// physical commit and the 0->1 bump of acquire.
///
/// Safe because a file record is only ever inserted after acquire
/// returns, so nothing can reference these rows. Maintenance path, not
/// part of any hot operation.
pub fn sweep_orphans(conn: &Connection, store: &BlobStore) -> Result<usize> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOB_COLUMNS} FROM blobs WHERE ref_count = 0"
    ))?;
    let orphans = stmt
        .query_map([], parse_blob_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for entry in &orphans {
        gc::collect(conn, store, entry)?;
    }

    if !orphans.is_empty() {
        info!("swept {} orphaned blob(s)", orphans.len());
    }

    Ok(orphans.len())
}
