//! DuplicateReconciler: batch collapse of file records sharing a blob.
//!
//! For every blob referenced by more than one file record, keep the
//! record with the earliest created_at (ties broken by lowest id, so
//! the outcome is deterministic) and unlink the rest through the same
//! release/collect path an ordinary delete takes. The caller wraps the
//! whole pass in one transaction: a failure partway through leaves the
//! registry exactly as it was.

use rusqlite::{params, Connection};
use tracing::info;
use vaultcas::BlobStore;

use crate::error::Result;
use crate::registry::{hash_from_text, unlink_row};
use crate::types::ReconcileReport;

pub(crate) fn run(conn: &Connection, store: &BlobStore) -> Result<ReconcileReport> {
    let duplicated: Vec<String> = conn
        .prepare(
            "SELECT content_id FROM files
             GROUP BY content_id HAVING COUNT(*) > 1
             ORDER BY content_id",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut report = ReconcileReport::default();

    for raw in duplicated {
        let content_id = hash_from_text(&raw)?;

        let members: Vec<String> = conn
            .prepare(
                "SELECT id FROM files WHERE content_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?
            .query_map(params![raw], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // First member is the keeper; everything after it goes.
        for loser in &members[1..] {
            unlink_row(conn, store, loser, &content_id)?;
            report.removed_count += 1;
        }

        report.affected_content_ids.push(content_id);
    }

    if report.removed_count > 0 {
        info!(
            "reconciled {} duplicate file(s) across {} blob(s)",
            report.removed_count,
            report.affected_content_ids.len()
        );
    }

    Ok(report)
}
