//! Batch upsert engine.
//!
//! Collapses normalized rows in memory, then persists them with insert-or-skip
//! writes in strict dependency order: tracks, artists, albums, then the three
//! junction tables. The schema enforces no foreign keys, so this order is what
//! keeps concurrent readers from seeing dangling references.
//!
//! The whole operation is idempotent: re-running a batch with overlapping data
//! is a no-op for already-known rows. A failed table write is recorded and
//! later tables are still attempted - partial application is accepted, there
//! is no rollback.

use std::collections::HashMap;
use std::fmt;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db;
use crate::ingest::normalize::NormalizedTrack;
use crate::model::{Album, AlbumArtist, AlbumTrack, Artist, Track, TrackArtist};

/// The six catalog tables, named for write sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogTable {
    Tracks,
    Artists,
    Albums,
    TrackArtists,
    AlbumTracks,
    AlbumArtists,
}

impl CatalogTable {
    /// Junction tables reference the parent entity tables.
    pub fn is_junction(&self) -> bool {
        matches!(
            self,
            CatalogTable::TrackArtists | CatalogTable::AlbumTracks | CatalogTable::AlbumArtists
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogTable::Tracks => "tracks",
            CatalogTable::Artists => "artists",
            CatalogTable::Albums => "albums",
            CatalogTable::TrackArtists => "track_artists",
            CatalogTable::AlbumTracks => "album_tracks",
            CatalogTable::AlbumArtists => "album_artists",
        }
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write sequence for one upsert call: every parent entity table before any
/// junction table. `upsert_catalog` iterates exactly this.
pub const WRITE_ORDER: [CatalogTable; 6] = [
    CatalogTable::Tracks,
    CatalogTable::Artists,
    CatalogTable::Albums,
    CatalogTable::TrackArtists,
    CatalogTable::AlbumTracks,
    CatalogTable::AlbumArtists,
];

/// In-memory accumulator that deduplicates rows across an entire input batch
/// before any write occurs.
///
/// Tracks key by ISRC, artists and albums by provider id, junctions by their
/// composite key as a tuple. Within a batch, last write wins for attribute
/// values: if the same artist id appears twice with different name casing,
/// the later occurrence's name is kept.
#[derive(Debug, Default)]
pub struct CatalogBatch {
    tracks: HashMap<String, Track>,
    artists: HashMap<String, Artist>,
    albums: HashMap<String, Album>,
    track_artists: HashMap<(String, String), TrackArtist>,
    album_tracks: HashMap<(String, String), AlbumTrack>,
    album_artists: HashMap<(String, String), AlbumArtist>,
}

impl CatalogBatch {
    /// Fold one normalized track's row set into the batch.
    pub fn add(&mut self, normalized: NormalizedTrack) {
        self.tracks.insert(normalized.track.isrc.clone(), normalized.track);
        for artist in normalized.artists {
            self.artists.insert(artist.id.clone(), artist);
        }
        if let Some(album) = normalized.album {
            self.albums.insert(album.id.clone(), album);
        }
        for row in normalized.track_artists {
            self.track_artists
                .insert((row.track_isrc.clone(), row.artist_id.clone()), row);
        }
        if let Some(row) = normalized.album_track {
            self.album_tracks
                .insert((row.album_id.clone(), row.track_id.clone()), row);
        }
        for row in normalized.album_artists {
            self.album_artists
                .insert((row.album_id.clone(), row.artist_id.clone()), row);
        }
    }

    /// Total rows across all six tables.
    pub fn len(&self) -> usize {
        self.tracks.len()
            + self.artists.len()
            + self.albums.len()
            + self.track_artists.len()
            + self.album_tracks.len()
            + self.album_artists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-table counts of rows attempted by one upsert call.
///
/// Conflict-skipped rows are absorbed into the same count as genuinely new
/// ones; the store primitive doesn't distinguish them here.
#[derive(Debug, Default)]
pub struct UpsertSummary {
    pub tracks: usize,
    pub artists: usize,
    pub albums: usize,
    pub track_artists: usize,
    pub album_tracks: usize,
    pub album_artists: usize,
    pub errors: Vec<String>,
}

/// Persist a deduplicated batch, visiting tables in [`WRITE_ORDER`].
///
/// Row sets longer than `chunk_size` are split into sequential multi-row
/// INSERT statements. Empty row sets are not submitted. A failing table write
/// does not roll back earlier tables or stop later ones; it lands in
/// `UpsertSummary::errors`.
pub async fn upsert_catalog(
    pool: &SqlitePool,
    batch: &CatalogBatch,
    chunk_size: usize,
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    if batch.is_empty() {
        return summary;
    }
    let chunk_size = chunk_size.max(1);

    for table in WRITE_ORDER {
        match table {
            CatalogTable::Tracks => {
                let rows: Vec<Track> = batch.tracks.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_tracks(pool, chunk).await {
                        Ok(_) => summary.tracks += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
            CatalogTable::Artists => {
                let rows: Vec<Artist> = batch.artists.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_artists(pool, chunk).await {
                        Ok(_) => summary.artists += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
            CatalogTable::Albums => {
                let rows: Vec<Album> = batch.albums.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_albums(pool, chunk).await {
                        Ok(_) => summary.albums += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
            CatalogTable::TrackArtists => {
                let rows: Vec<TrackArtist> = batch.track_artists.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_track_artists(pool, chunk).await {
                        Ok(_) => summary.track_artists += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
            CatalogTable::AlbumTracks => {
                let rows: Vec<AlbumTrack> = batch.album_tracks.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_album_tracks(pool, chunk).await {
                        Ok(_) => summary.album_tracks += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
            CatalogTable::AlbumArtists => {
                let rows: Vec<AlbumArtist> = batch.album_artists.values().cloned().collect();
                for chunk in rows.chunks(chunk_size) {
                    match db::insert_album_artists(pool, chunk).await {
                        Ok(_) => summary.album_artists += chunk.len(),
                        Err(e) => record_failure(&mut summary, table, &e),
                    }
                }
            }
        }
    }

    debug!(
        tracks = summary.tracks,
        artists = summary.artists,
        albums = summary.albums,
        errors = summary.errors.len(),
        "Catalog batch upserted"
    );
    summary
}

fn record_failure(summary: &mut UpsertSummary, table: CatalogTable, error: &sqlx::Error) {
    warn!(table = %table, error = %error, "Catalog insert failed");
    summary.errors.push(format!("{table} insert failed: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalize::normalize_track;
    use crate::test_utils::{recently_played_track, test_pool};

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, pool) = test_pool().await;

        let mut batch = CatalogBatch::default();
        batch.add(normalize_track(&recently_played_track("t1", Some("ISRC1"))));

        let first = upsert_catalog(&pool, &batch, 1000).await;
        assert!(first.errors.is_empty());

        let second = upsert_catalog(&pool, &batch, 1000).await;
        assert!(second.errors.is_empty());

        let counts = db::catalog_counts(&pool).await.unwrap();
        assert_eq!(counts.tracks, 1);
        assert_eq!(counts.artists, 1);
        assert_eq!(counts.albums, 1);
    }

    #[tokio::test]
    async fn test_isrc_collapse_yields_one_track_row() {
        let (_dir, pool) = test_pool().await;

        let mut batch = CatalogBatch::default();
        batch.add(normalize_track(&recently_played_track("t1", Some("ISRC1"))));
        batch.add(normalize_track(&recently_played_track("t2", Some("ISRC1"))));

        let summary = upsert_catalog(&pool, &batch, 1000).await;
        assert_eq!(summary.tracks, 1);
        // Both releases land as separate album_tracks referencing the one ISRC
        assert_eq!(summary.album_tracks, 2);

        let counts = db::catalog_counts(&pool).await.unwrap();
        assert_eq!(counts.tracks, 1);

        let row = db::get_track(&pool, "ISRC1").await.unwrap();
        assert!(row.is_some());
    }

    #[tokio::test]
    async fn test_last_write_wins_within_batch() {
        let (_dir, pool) = test_pool().await;

        let mut batch = CatalogBatch::default();
        let mut first = recently_played_track("t1", Some("ISRC1"));
        first.artists[0].name = "artist".to_string();
        let mut second = recently_played_track("t2", Some("ISRC2"));
        second.artists[0].name = "ARTIST".to_string();
        batch.add(normalize_track(&first));
        batch.add(normalize_track(&second));

        let summary = upsert_catalog(&pool, &batch, 1000).await;
        assert_eq!(summary.artists, 1);

        let missing = db::artists_missing_image(&pool).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "ARTIST");
    }

    #[tokio::test]
    async fn test_chunked_upsert_covers_all_rows() {
        let (_dir, pool) = test_pool().await;

        let mut batch = CatalogBatch::default();
        for i in 0..25 {
            let mut track = recently_played_track(&format!("t{i}"), None);
            track.album = None;
            batch.add(normalize_track(&track));
        }

        // 25 tracks with chunk size 10: three statements, exact boundaries
        let summary = upsert_catalog(&pool, &batch, 10).await;
        assert!(summary.errors.is_empty());
        assert_eq!(summary.tracks, 25);

        let counts = db::catalog_counts(&pool).await.unwrap();
        assert_eq!(counts.tracks, 25);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let (_dir, pool) = test_pool().await;

        let batch = CatalogBatch::default();
        assert!(batch.is_empty());
        let summary = upsert_catalog(&pool, &batch, 1000).await;
        assert_eq!(summary.tracks, 0);
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_write_order_parents_before_junctions() {
        // Every junction write must come after every parent entity write;
        // junctions reference rows the same call is inserting.
        let first_junction = WRITE_ORDER
            .iter()
            .position(CatalogTable::is_junction)
            .expect("junction tables missing from write order");
        assert!(WRITE_ORDER[..first_junction].iter().all(|t| !t.is_junction()));
        assert!(WRITE_ORDER[first_junction..].iter().all(|t| t.is_junction()));

        // All six tables appear exactly once, tracks first
        assert_eq!(WRITE_ORDER.len(), 6);
        assert_eq!(WRITE_ORDER[0], CatalogTable::Tracks);
        for table in WRITE_ORDER {
            assert_eq!(WRITE_ORDER.iter().filter(|t| **t == table).count(), 1);
        }
    }

    #[test]
    fn test_batch_len_counts_all_tables() {
        let mut batch = CatalogBatch::default();
        batch.add(normalize_track(&recently_played_track("t1", Some("ISRC1"))));
        // 1 track + 1 artist + 1 album + 1 track_artist + 1 album_track + 1 album_artist
        assert_eq!(batch.len(), 6);
    }
}
