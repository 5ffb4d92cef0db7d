//! Core data models for the listening catalog.
//!
//! Defines the entities the ingestion pipeline writes: [`Track`], [`Artist`],
//! [`Album`], the three junction rows, and [`Listen`] playback events.
//! These are derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `tracks` - Recordings keyed by ISRC (or a `spotify_<id>` fallback)
//! - `artists` - Provider artists with lazily back-filled image URLs
//! - `albums` - Provider albums
//! - `track_artists`, `album_tracks`, `album_artists` - many-to-many links
//! - `listens` - Individual playback events

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A recording, keyed by ISRC.
///
/// Two provider track ids that share an ISRC are the same recording and
/// collapse to one row.
#[derive(Debug, Clone, FromRow)]
pub struct Track {
    /// ISRC, or `spotify_<track id>` when the provider has none
    pub isrc: String,
    /// Display name
    pub name: String,
    /// Duration in milliseconds
    pub duration_ms: i64,
}

/// An artist, keyed by the provider's artist id.
#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    /// Provider artist id
    pub id: String,
    /// Display name
    pub name: String,
    /// Image URL; starts NULL, back-filled by the image sweep
    pub image_url: Option<String>,
}

/// An album release, keyed by the provider's album id.
#[derive(Debug, Clone, FromRow)]
pub struct Album {
    /// Provider album id
    pub id: String,
    /// Display name
    pub name: String,
    /// First image URL in the provider's image list, if any
    pub image_url: Option<String>,
}

/// "This recording features this artist."
#[derive(Debug, Clone, FromRow)]
pub struct TrackArtist {
    pub track_isrc: String,
    pub artist_id: String,
}

/// "This release contains this track."
///
/// `track_id` is the provider's release-specific id; `track_isrc` points at
/// the canonical recording. The same ISRC can appear under several releases.
#[derive(Debug, Clone, FromRow)]
pub struct AlbumTrack {
    pub album_id: String,
    pub track_id: String,
    pub track_isrc: String,
}

/// "This artist appears on this album."
#[derive(Debug, Clone, FromRow)]
pub struct AlbumArtist {
    pub album_id: String,
    pub artist_id: String,
}

/// A single persisted playback event.
#[derive(Debug, Clone, FromRow)]
pub struct Listen {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Provider track id that was played (release-specific, not ISRC)
    pub track_id: String,
    /// Milliseconds actually played
    pub duration_ms: i64,
    /// Instant the play finished, per the provider
    pub played_at: DateTime<Utc>,
    /// True for rows from a bulk historical import, false for live polls
    pub imported: bool,
}

/// A candidate playback event that has not been persisted yet.
///
/// There is no natural unique key across provider data; the deduplication
/// guard approximates identity by `played_at` equality.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListen {
    pub track_id: String,
    pub duration_ms: i64,
    pub played_at: DateTime<Utc>,
    pub imported: bool,
}
