//! GarbageCollector: synchronous blob reclamation at the zero-crossing.
//!
//! Collection is strictly event-driven: it runs inside the same
//! transaction as the release that took ref_count to 0 (or from the
//! orphan sweep), never on a timer. One collect per blob per
//! zero-crossing, so zero-ref rows never accumulate.

use rusqlite::{params, Connection};
use tracing::{debug, warn};
use vaultcas::BlobStore;

use crate::error::Result;
use crate::types::BlobEntry;

/// Remove a blob's physical bytes and its ledger row.
///
/// The physical delete is best-effort: a missing file means the
/// filesystem already diverged, and the point here is to converge the
/// ledger regardless, so the failure is logged rather than propagated.
pub fn collect(conn: &Connection, store: &BlobStore, entry: &BlobEntry) -> Result<()> {
    if let Err(e) = store.remove(&entry.content_id) {
        warn!(
            "failed to remove blob {} from disk (continuing): {}",
            entry.content_id, e
        );
    }

    conn.execute(
        "DELETE FROM blobs WHERE content_id = ?1",
        params![entry.content_id.as_str()],
    )?;

    debug!("collected blob {} ({} bytes)", entry.content_id, entry.byte_size);
    Ok(())
}
