//! Listen deduplication guard.
//!
//! Listens have no natural unique key in provider data, so identity is
//! approximated by `played_at` timestamp equality. Two genuinely distinct
//! plays at the identical instant would collide and be dropped; provider
//! timestamps are second-granularity and collisions are empirically rare for
//! a single listener, so that risk is accepted.
//!
//! Two ingestion modes with different consistency policies:
//!
//! - live polling: filter candidates against existing rows by exact
//!   timestamp membership, insert only the new ones;
//! - bulk historical import: treat the export as a superseding snapshot -
//!   delete everything at or before the newest imported timestamp, then
//!   insert all candidates in fixed-size batches.

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::db;
use crate::model::NewListen;

/// Result of one bulk import pass.
#[derive(Debug, Default)]
pub struct ImportOutcome {
    /// Rows inserted across all chunks
    pub inserted: usize,
    /// Superseded rows evicted before insertion
    pub evicted: u64,
    /// Per-chunk failures; chunks after a failed one still run
    pub errors: Vec<String>,
}

/// Live-polling mode: insert only candidates whose `played_at` is not already
/// persisted. Returns the number of rows inserted.
///
/// Duplicates within the candidate batch itself also collapse to one row.
pub async fn insert_new_listens(
    pool: &SqlitePool,
    candidates: &[NewListen],
) -> sqlx::Result<usize> {
    if candidates.is_empty() {
        return Ok(0);
    }

    let stamps: Vec<_> = candidates.iter().map(|c| c.played_at).collect();
    let mut seen = db::find_listens_played_at(pool, &stamps).await?;

    let new: Vec<NewListen> = candidates
        .iter()
        .filter(|c| seen.insert(c.played_at))
        .cloned()
        .collect();

    db::insert_listens(pool, &new).await?;
    debug!(
        candidates = candidates.len(),
        inserted = new.len(),
        "Live listen batch deduplicated"
    );
    Ok(new.len())
}

/// Bulk import mode: evict superseded rows, then insert everything.
///
/// The delete runs BEFORE any insert - running it after would wipe the rows
/// just written. Batches are inserted sequentially and are each independently
/// durable; a failure partway through leaves earlier batches committed.
pub async fn import_listens(
    pool: &SqlitePool,
    candidates: &[NewListen],
    batch_size: usize,
    mut progress: impl FnMut(&str, f32),
) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();

    let Some(latest_imported) = candidates.iter().map(|c| c.played_at).max() else {
        return outcome;
    };

    match db::delete_listens_through(pool, latest_imported).await {
        Ok(evicted) => {
            outcome.evicted = evicted;
            info!(evicted, cutoff = %latest_imported, "Evicted superseded listens");
        }
        Err(e) => {
            // Without the eviction, inserting would double count history.
            warn!(error = %e, "Listen eviction failed, aborting import");
            outcome.errors.push(format!("listen eviction failed: {e}"));
            return outcome;
        }
    }

    let batch_size = batch_size.max(1);
    let total = candidates.len();
    let mut attempted = 0usize;
    for chunk in candidates.chunks(batch_size) {
        match db::insert_listens(pool, chunk).await {
            Ok(inserted) => outcome.inserted += inserted as usize,
            Err(e) => {
                warn!(error = %e, "Listen batch insert failed, continuing");
                outcome.errors.push(format!("listen batch insert failed: {e}"));
            }
        }
        attempted += chunk.len();
        progress("writing listens", attempted as f32 / total as f32 * 100.0);
    }

    outcome
}
