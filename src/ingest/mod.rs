//! Ingestion orchestrator - drives the end-to-end flow for each input source.
//!
//! Two entry points:
//! 1. Recurring poll: fetch the latest recently-played page (bounded lookback
//!    window), normalize, upsert the catalog, dedup-insert listens, then
//!    best-effort artist-image backfill.
//! 2. Bulk import: normalize user-supplied export records (files are merged
//!    by the caller into one logical batch), evict-and-insert listens in bulk
//!    mode, then resolve catalog metadata for unknown track ids in chunked
//!    lookups.
//!
//! A run moves through [`RunPhase`]s and ends Complete or PartialFailure;
//! failures are terminal-but-partial, never compensated. Per-chunk and
//! per-record problems accumulate in the summary's `errors`/`skipped` rather
//! than aborting the run; only structurally fatal input or store loss
//! propagates as `Err`.

pub mod dedup;
pub mod export;
pub mod normalize;
pub mod upsert;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::db;
use crate::error::Result;
use crate::model::NewListen;
use crate::spotify::{SpotifyClient, dto};
use export::ExportRecord;
use upsert::CatalogBatch;

/// Page size for the recently-played endpoint (its maximum).
const RECENTLY_PLAYED_LIMIT: u8 = 50;

/// Phases of one ingestion run. There is no rolled-back phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Fetching,
    Normalizing,
    Deduplicating,
    Writing,
    Complete,
    PartialFailure,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Fetching => "fetching",
            RunPhase::Normalizing => "normalizing",
            RunPhase::Deduplicating => "deduplicating",
            RunPhase::Writing => "writing",
            RunPhase::Complete => "complete",
            RunPhase::PartialFailure => "partial_failure",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one ingestion run accomplished.
///
/// `errors` is the sole partial-failure signal: an otherwise-successful run
/// with a failed chunk completes with that chunk recorded here.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl IngestSummary {
    fn final_phase(&self) -> RunPhase {
        if self.errors.is_empty() { RunPhase::Complete } else { RunPhase::PartialFailure }
    }
}

/// Drives ingestion against an explicit store handle and provider client.
pub struct Ingestor {
    pool: SqlitePool,
    spotify: SpotifyClient,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(pool: SqlitePool, spotify: SpotifyClient, config: IngestConfig) -> Self {
        Self { pool, spotify, config }
    }

    /// One live-poll pass: fetch, normalize, upsert, dedup-insert, backfill.
    pub async fn ingest_live_poll(&self) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        info!(phase = %RunPhase::Pending, "Starting live poll");

        info!(phase = %RunPhase::Fetching, "Polling recently played");
        let after = Utc::now()
            - chrono::Duration::seconds(self.config.poll_lookback_secs.min(i64::MAX as u64) as i64);
        let page = match self.spotify.recently_played(after, RECENTLY_PLAYED_LIMIT).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Recently-played fetch failed");
                summary.errors.push(format!("recently-played fetch failed: {e}"));
                info!(phase = %RunPhase::PartialFailure, "Live poll finished");
                return Ok(summary);
            }
        };

        if page.items.is_empty() {
            info!(phase = %RunPhase::Complete, "No new plays in lookback window");
            return Ok(summary);
        }

        self.apply_live_page(&page.items, &mut summary).await;

        // Secondary, best-effort: backfill images for any artists just added
        if let Err(e) = self.backfill_artist_images().await {
            warn!(error = %e, "Artist image backfill failed");
        }

        info!(
            phase = %summary.final_phase(),
            processed = summary.processed,
            errors = summary.errors.len(),
            "Live poll finished"
        );
        Ok(summary)
    }

    /// Normalize and persist one page of play-history items.
    async fn apply_live_page(&self, items: &[dto::PlayHistoryItem], summary: &mut IngestSummary) {
        info!(phase = %RunPhase::Normalizing, items = items.len(), "Normalizing page");
        let mut batch = CatalogBatch::default();
        let mut candidates = Vec::with_capacity(items.len());
        for item in items {
            batch.add(normalize::normalize_track(&item.track));
            candidates.push(NewListen {
                track_id: item.track.id.clone(),
                duration_ms: item.track.duration_ms,
                played_at: item.played_at,
                imported: false,
            });
            summary.processed += 1;
        }

        info!(phase = %RunPhase::Writing, rows = batch.len(), "Upserting catalog rows");
        let upsert = upsert::upsert_catalog(&self.pool, &batch, self.config.insert_batch_size).await;
        summary.errors.extend(upsert.errors);

        info!(phase = %RunPhase::Deduplicating, candidates = candidates.len(), "Filtering listens");
        match dedup::insert_new_listens(&self.pool, &candidates).await {
            Ok(inserted) => debug!(inserted, "Inserted new listens"),
            Err(e) => {
                warn!(error = %e, "Listen insert failed");
                summary.errors.push(format!("listen insert failed: {e}"));
            }
        }
    }

    /// Bulk historical import of already-parsed export records.
    ///
    /// Records from multiple files must be concatenated by the caller first;
    /// a user may split one year of history across several files, and the
    /// eviction cutoff has to see the merged batch.
    pub async fn ingest_bulk_import(
        &self,
        records: &[ExportRecord],
        mut progress: impl FnMut(&str, f32),
    ) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();
        info!(phase = %RunPhase::Pending, records = records.len(), "Starting bulk import");

        info!(phase = %RunPhase::Normalizing, "Normalizing export records");
        progress("normalizing records", 0.0);
        let mut candidates = Vec::new();
        for record in records {
            match normalize::normalize_export_record(record) {
                Some(candidate) => candidates.push(candidate),
                None => summary.skipped += 1,
            }
        }

        info!(
            phase = %RunPhase::Deduplicating,
            candidates = candidates.len(),
            skipped = summary.skipped,
            "Importing listens"
        );
        let outcome = dedup::import_listens(
            &self.pool,
            &candidates,
            self.config.insert_batch_size,
            &mut progress,
        )
        .await;
        summary.processed = outcome.inserted;
        summary.errors.extend(outcome.errors);

        self.enrich_imported_tracks(&candidates, &mut progress, &mut summary).await?;

        info!(
            phase = %summary.final_phase(),
            processed = summary.processed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Bulk import finished"
        );
        Ok(summary)
    }

    /// Resolve catalog metadata for imported track ids the catalog doesn't
    /// know yet, in provider-limit-sized chunks with a fixed inter-chunk
    /// delay. A failed chunk is recorded and processing continues.
    async fn enrich_imported_tracks(
        &self,
        candidates: &[NewListen],
        progress: &mut impl FnMut(&str, f32),
        summary: &mut IngestSummary,
    ) -> Result<()> {
        let distinct: BTreeSet<&str> = candidates.iter().map(|c| c.track_id.as_str()).collect();
        let ids: Vec<String> = distinct.into_iter().map(String::from).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let known = db::known_album_track_ids(&self.pool, &ids).await?;
        let unknown: Vec<String> = ids.into_iter().filter(|id| !known.contains(id)).collect();
        if unknown.is_empty() {
            debug!("All imported tracks already in catalog");
            return Ok(());
        }

        info!(phase = %RunPhase::Fetching, tracks = unknown.len(), "Resolving imported track metadata");
        let chunk_size = self.config.track_lookup_chunk.max(1);
        let total_chunks = unknown.len().div_ceil(chunk_size);
        let mut batch = CatalogBatch::default();
        for (i, chunk) in unknown.chunks(chunk_size).enumerate() {
            match self.spotify.tracks(chunk).await {
                Ok(tracks) => {
                    for slot in tracks {
                        match slot {
                            Some(track) => batch.add(normalize::normalize_track(&track)),
                            // Provider doesn't know this id: a skip, not an error
                            None => summary.skipped += 1,
                        }
                    }
                }
                Err(e) => {
                    warn!(chunk = i + 1, error = %e, "Track lookup chunk failed, continuing");
                    summary.errors.push(format!("track lookup chunk {} failed: {e}", i + 1));
                }
            }
            progress(
                "resolving track metadata",
                (i + 1) as f32 / total_chunks as f32 * 100.0,
            );
            if i + 1 < total_chunks {
                tokio::time::sleep(Duration::from_millis(self.config.lookup_delay_ms)).await;
            }
        }

        info!(phase = %RunPhase::Writing, rows = batch.len(), "Upserting resolved catalog rows");
        let upsert = upsert::upsert_catalog(&self.pool, &batch, self.config.insert_batch_size).await;
        summary.errors.extend(upsert.errors);
        Ok(())
    }

    /// Decoupled, idempotent sweep: fetch images for every artist that has
    /// none. Per-artist failures are logged and skipped; the sweep never
    /// aborts on a single failure.
    pub async fn backfill_artist_images(&self) -> Result<()> {
        let missing = db::artists_missing_image(&self.pool).await?;
        if missing.is_empty() {
            return Ok(());
        }

        info!(count = missing.len(), "Backfilling artist images");
        for (i, artist) in missing.iter().enumerate() {
            match self.spotify.artist(&artist.id).await {
                Ok(full) => {
                    if let Some(image) = full.images.first() {
                        db::set_artist_image(&self.pool, &artist.id, &image.url).await?;
                    } else {
                        debug!(artist = %artist.id, "Provider has no image for artist");
                    }
                }
                Err(e) => {
                    warn!(artist = %artist.id, error = %e, "Artist image fetch failed, skipping");
                }
            }
            if i + 1 < missing.len() {
                tokio::time::sleep(Duration::from_millis(self.config.lookup_delay_ms)).await;
            }
        }
        Ok(())
    }
}
