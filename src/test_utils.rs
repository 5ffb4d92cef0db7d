//! Test utilities and fixtures for playlog tests.
//!
//! This module provides common test helpers, mock factories, and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use playlog::test_utils::{test_pool, recently_played_track, ts};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (_dir, pool) = test_pool().await;
//!     let track = recently_played_track("t1", Some("ISRC1"));
//!     // ... test logic
//! }
//! ```

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::model::NewListen;
use crate::spotify::dto;

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically. Keep the TempDir alive for the duration of your test.
pub async fn test_pool() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (dir, pool)
}

/// Parse an RFC 3339 timestamp, panicking on bad test input.
pub fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("invalid test timestamp")
        .with_timezone(&Utc)
}

/// A live-poll listen candidate at a given instant.
pub fn listen_at(track_id: &str, played_at: DateTime<Utc>) -> NewListen {
    NewListen {
        track_id: track_id.to_string(),
        duration_ms: 200_000,
        played_at,
        imported: false,
    }
}

/// A full live-API track object with one artist and an album, matching the
/// shape the recently-played endpoint returns.
pub fn recently_played_track(id: &str, isrc: Option<&str>) -> dto::Track {
    dto::Track {
        id: id.to_string(),
        name: "Song".to_string(),
        duration_ms: 200_000,
        external_ids: dto::ExternalIds { isrc: isrc.map(String::from) },
        artists: vec![dto::ArtistRef { id: "a1".to_string(), name: "Artist".to_string() }],
        album: Some(dto::AlbumRef {
            id: "al1".to_string(),
            name: "Album".to_string(),
            images: vec![dto::Image { url: "http://img".to_string() }],
        }),
    }
}
