//! Database module for the listening catalog.
//!
//! Uses SQLx with SQLite for lightweight, embedded database storage.
//! Provides async operations for:
//! - Batched insert-or-skip writes per entity table
//! - Listen membership queries by exact timestamp (dedup support)
//! - Date-scoped listen eviction for historical reimports
//! - The one permitted update-in-place: artist image backfill
//!
//! All writes are conflict-tolerant (`ON CONFLICT DO NOTHING`): re-running a
//! batch with overlapping data is a no-op for already-known rows. Foreign-key
//! ordering is the caller's responsibility; the schema enforces none.
//!
//! # Example
//!
//! ```ignore
//! use playlog::db::{init_db, insert_tracks};
//!
//! let pool = init_db("sqlite:playlog.db").await?;
//! insert_tracks(&pool, &rows).await?;
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::model::{Album, AlbumArtist, AlbumTrack, Artist, Listen, NewListen, Track, TrackArtist};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "playlog.db";

/// SQLite's bind-parameter ceiling is generous on modern builds but 999 on
/// older ones; membership queries stay well under it.
const IN_CLAUSE_CHUNK: usize = 500;

/// Rows per INSERT statement for listens (4 binds each). Caller batch sizes
/// can exceed this; the statement itself must stay under the 32766-parameter
/// ceiling of bundled SQLite.
const LISTEN_ROW_CHUNK: usize = 5_000;

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a connection
/// pool with up to 5 connections, and runs all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - Database creation fails
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if !sqlx::Sqlite::database_exists(db_url).await.unwrap_or(false) {
        sqlx::Sqlite::create_database(db_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Catalog writes (insert-or-skip, one multi-row statement per call)
// ============================================================================

/// Insert track rows, skipping any ISRC already present.
///
/// Returns the number of rows actually inserted (conflicts excluded).
pub async fn insert_tracks(pool: &SqlitePool, rows: &[Track]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO tracks (isrc, name, duration_ms) ");
    qb.push_values(rows, |mut b, t| {
        b.push_bind(&t.isrc).push_bind(&t.name).push_bind(t.duration_ms);
    });
    qb.push(" ON CONFLICT (isrc) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert artist rows, skipping known ids. Image URLs of existing rows are
/// never touched here; see [`set_artist_image`].
pub async fn insert_artists(pool: &SqlitePool, rows: &[Artist]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO artists (id, name, image_url) ");
    qb.push_values(rows, |mut b, a| {
        b.push_bind(&a.id).push_bind(&a.name).push_bind(&a.image_url);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert album rows, skipping known ids.
pub async fn insert_albums(pool: &SqlitePool, rows: &[Album]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO albums (id, name, image_url) ");
    qb.push_values(rows, |mut b, a| {
        b.push_bind(&a.id).push_bind(&a.name).push_bind(&a.image_url);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert track-artist junction rows, skipping known pairs.
pub async fn insert_track_artists(pool: &SqlitePool, rows: &[TrackArtist]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO track_artists (track_isrc, artist_id) ");
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.track_isrc).push_bind(&r.artist_id);
    });
    qb.push(" ON CONFLICT (track_isrc, artist_id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert album-track junction rows, skipping known pairs.
pub async fn insert_album_tracks(pool: &SqlitePool, rows: &[AlbumTrack]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb =
        QueryBuilder::<Sqlite>::new("INSERT INTO album_tracks (album_id, track_id, track_isrc) ");
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.album_id).push_bind(&r.track_id).push_bind(&r.track_isrc);
    });
    qb.push(" ON CONFLICT (album_id, track_id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert album-artist junction rows, skipping known pairs.
pub async fn insert_album_artists(pool: &SqlitePool, rows: &[AlbumArtist]) -> sqlx::Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO album_artists (album_id, artist_id) ");
    qb.push_values(rows, |mut b, r| {
        b.push_bind(&r.album_id).push_bind(&r.artist_id);
    });
    qb.push(" ON CONFLICT (album_id, artist_id) DO NOTHING");
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Listens
// ============================================================================

/// Insert listen rows. Listens have no conflict target: the deduplication
/// guard decides what is new before calling this.
pub async fn insert_listens(pool: &SqlitePool, rows: &[NewListen]) -> sqlx::Result<u64> {
    let mut inserted = 0;
    for chunk in rows.chunks(LISTEN_ROW_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "INSERT INTO listens (track_id, duration_ms, played_at, imported) ",
        );
        qb.push_values(chunk, |mut b, l| {
            b.push_bind(&l.track_id)
                .push_bind(l.duration_ms)
                .push_bind(l.played_at)
                .push_bind(l.imported);
        });
        let result = qb.build().execute(pool).await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// Return the subset of `stamps` that already exists as a listen `played_at`.
///
/// Used by the live-mode deduplication guard: a candidate is new iff its
/// timestamp is absent from the returned set.
pub async fn find_listens_played_at(
    pool: &SqlitePool,
    stamps: &[DateTime<Utc>],
) -> sqlx::Result<HashSet<DateTime<Utc>>> {
    let mut existing = HashSet::new();
    for chunk in stamps.chunks(IN_CLAUSE_CHUNK) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT played_at FROM listens WHERE played_at IN (");
        let mut sep = qb.separated(", ");
        for ts in chunk {
            sep.push_bind(*ts);
        }
        qb.push(")");
        let rows: Vec<(DateTime<Utc>,)> = qb.build_query_as().fetch_all(pool).await?;
        existing.extend(rows.into_iter().map(|(ts,)| ts));
    }
    Ok(existing)
}

/// Delete every listen played at or before `cutoff`. Returns rows deleted.
///
/// Bulk-reimport eviction: a full historical export supersedes everything up
/// to its newest record, so older rows are presumed re-supplied duplicates.
pub async fn delete_listens_through(
    pool: &SqlitePool,
    cutoff: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM listens WHERE played_at <= ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Get all listens ordered by play time. Inspection and test support; the
/// aggregation read-side lives elsewhere.
pub async fn get_all_listens(pool: &SqlitePool) -> sqlx::Result<Vec<Listen>> {
    sqlx::query_as::<_, Listen>(
        "SELECT id, track_id, duration_ms, played_at, imported FROM listens ORDER BY played_at",
    )
    .fetch_all(pool)
    .await
}

// ============================================================================
// Lookups
// ============================================================================

/// Get a track by ISRC.
pub async fn get_track(pool: &SqlitePool, isrc: &str) -> sqlx::Result<Option<Track>> {
    sqlx::query_as::<_, Track>("SELECT isrc, name, duration_ms FROM tracks WHERE isrc = ?")
        .bind(isrc)
        .fetch_optional(pool)
        .await
}

/// Return the subset of provider track ids already linked to an album.
///
/// The import enrichment pass uses this to avoid re-fetching metadata for
/// tracks the catalog already knows under some release.
pub async fn known_album_track_ids(
    pool: &SqlitePool,
    track_ids: &[String],
) -> sqlx::Result<HashSet<String>> {
    let mut known = HashSet::new();
    for chunk in track_ids.chunks(IN_CLAUSE_CHUNK) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT track_id FROM album_tracks WHERE track_id IN (");
        let mut sep = qb.separated(", ");
        for id in chunk {
            sep.push_bind(id);
        }
        qb.push(")");
        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(pool).await?;
        known.extend(rows.into_iter().map(|(id,)| id));
    }
    Ok(known)
}

/// Get all artists with no image URL yet, for the backfill sweep.
pub async fn artists_missing_image(pool: &SqlitePool) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>(
        "SELECT id, name, image_url FROM artists WHERE image_url IS NULL",
    )
    .fetch_all(pool)
    .await
}

/// Set an artist's image URL.
///
/// The only update-in-place the store permits; everything else is
/// insert-or-skip.
pub async fn set_artist_image(pool: &SqlitePool, artist_id: &str, url: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE artists SET image_url = ? WHERE id = ?")
        .bind(url)
        .bind(artist_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Row counts per table, for the status command.
#[derive(Debug, Clone, Default)]
pub struct CatalogCounts {
    pub tracks: i64,
    pub artists: i64,
    pub albums: i64,
    pub listens: i64,
}

/// Count rows in the main tables.
pub async fn catalog_counts(pool: &SqlitePool) -> sqlx::Result<CatalogCounts> {
    let tracks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
        .fetch_one(pool)
        .await?;
    let artists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artists")
        .fetch_one(pool)
        .await?;
    let albums: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM albums")
        .fetch_one(pool)
        .await?;
    let listens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listens")
        .fetch_one(pool)
        .await?;
    Ok(CatalogCounts { tracks, artists, albums, listens })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{listen_at, test_pool, ts};

    fn track(isrc: &str, name: &str) -> Track {
        Track { isrc: isrc.to_string(), name: name.to_string(), duration_ms: 200_000 }
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let (_dir, pool) = test_pool().await;

        let counts = catalog_counts(&pool).await.expect("Failed to query counts");
        assert_eq!(counts.tracks, 0);
        assert_eq!(counts.listens, 0);
    }

    #[tokio::test]
    async fn test_insert_tracks_skips_conflicts() {
        let (_dir, pool) = test_pool().await;

        let inserted = insert_tracks(&pool, &[track("ISRC1", "Song"), track("ISRC2", "Other")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        // Same ISRC again, different name: skipped, original row kept
        let inserted = insert_tracks(&pool, &[track("ISRC1", "Renamed")]).await.unwrap();
        assert_eq!(inserted, 0);

        let row = get_track(&pool, "ISRC1").await.unwrap().unwrap();
        assert_eq!(row.name, "Song");
    }

    #[tokio::test]
    async fn test_empty_slices_are_not_submitted() {
        let (_dir, pool) = test_pool().await;
        assert_eq!(insert_tracks(&pool, &[]).await.unwrap(), 0);
        assert_eq!(insert_listens(&pool, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_listens_played_at_membership() {
        let (_dir, pool) = test_pool().await;

        let t0 = ts("2024-01-01T00:00:00Z");
        let t1 = ts("2024-01-01T00:01:00Z");
        let t2 = ts("2024-01-01T00:02:00Z");
        insert_listens(&pool, &[listen_at("t1", t0), listen_at("t1", t1)])
            .await
            .unwrap();

        let existing = find_listens_played_at(&pool, &[t0, t1, t2]).await.unwrap();
        assert!(existing.contains(&t0));
        assert!(existing.contains(&t1));
        assert!(!existing.contains(&t2));
    }

    #[tokio::test]
    async fn test_delete_listens_through_boundary() {
        let (_dir, pool) = test_pool().await;

        let before = ts("2024-01-01T00:00:00Z");
        let at = ts("2024-01-02T00:00:00Z");
        let after = ts("2024-01-03T00:00:00Z");
        insert_listens(
            &pool,
            &[listen_at("t1", before), listen_at("t1", at), listen_at("t1", after)],
        )
        .await
        .unwrap();

        // Cutoff is inclusive
        let deleted = delete_listens_through(&pool, at).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = get_all_listens(&pool).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].played_at, after);
    }

    #[tokio::test]
    async fn test_artist_image_backfill() {
        let (_dir, pool) = test_pool().await;

        let rows = vec![
            Artist { id: "a1".to_string(), name: "One".to_string(), image_url: None },
            Artist {
                id: "a2".to_string(),
                name: "Two".to_string(),
                image_url: Some("http://img/2".to_string()),
            },
        ];
        insert_artists(&pool, &rows).await.unwrap();

        let missing = artists_missing_image(&pool).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "a1");

        set_artist_image(&pool, "a1", "http://img/1").await.unwrap();
        assert!(artists_missing_image(&pool).await.unwrap().is_empty());

        // Re-inserting an artist never clears a backfilled image
        insert_artists(
            &pool,
            &[Artist { id: "a1".to_string(), name: "One".to_string(), image_url: None }],
        )
        .await
        .unwrap();
        assert!(artists_missing_image(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_known_album_track_ids() {
        let (_dir, pool) = test_pool().await;

        insert_album_tracks(
            &pool,
            &[AlbumTrack {
                album_id: "al1".to_string(),
                track_id: "t1".to_string(),
                track_isrc: "ISRC1".to_string(),
            }],
        )
        .await
        .unwrap();

        let known = known_album_track_ids(&pool, &["t1".to_string(), "t2".to_string()])
            .await
            .unwrap();
        assert!(known.contains("t1"));
        assert!(!known.contains("t2"));
    }

    #[tokio::test]
    async fn test_junctions_accept_missing_parents() {
        let (_dir, pool) = test_pool().await;

        // No FK enforcement: a junction row may land before its parents
        let inserted = insert_track_artists(
            &pool,
            &[TrackArtist { track_isrc: "ISRC-X".to_string(), artist_id: "ghost".to_string() }],
        )
        .await
        .unwrap();
        assert_eq!(inserted, 1);
    }
}
