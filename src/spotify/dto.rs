//! Spotify Web API Data Transfer Objects
//!
//! These types match EXACTLY what the Spotify API returns.
//! DO NOT add fields that aren't in the API response.
//! DO NOT use these types outside the spotify module - the normalizer
//! converts them into catalog rows.
//!
//! API Reference: https://developer.spotify.com/documentation/web-api
//!
//! Example recently-played item:
//! ```json
//! {
//!   "items": [{
//!     "track": {
//!       "id": "t1",
//!       "name": "Song",
//!       "duration_ms": 200000,
//!       "external_ids": {"isrc": "ISRC1"},
//!       "artists": [{"id": "a1", "name": "Artist"}],
//!       "album": {"id": "al1", "name": "Album", "images": [{"url": "http://img"}]}
//!     },
//!     "played_at": "2024-01-01T00:00:00Z"
//!   }]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Top-level response of `GET /me/player/recently-played`
#[derive(Debug, Clone, Deserialize)]
pub struct RecentlyPlayedResponse {
    #[serde(default)]
    pub items: Vec<PlayHistoryItem>,
}

/// One play-history entry
#[derive(Debug, Clone, Deserialize)]
pub struct PlayHistoryItem {
    pub track: Track,
    /// ISO 8601 instant the track finished playing
    pub played_at: DateTime<Utc>,
}

/// A full track object
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    /// Provider track id (release-specific)
    pub id: String,
    /// Track title
    pub name: String,
    /// Duration in milliseconds
    pub duration_ms: i64,
    /// External identifiers; absent for local files
    #[serde(default)]
    pub external_ids: ExternalIds,
    /// Credited artists
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    /// Containing album; absent in some contexts
    pub album: Option<AlbumRef>,
}

/// External identifiers attached to a track
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalIds {
    /// International Standard Recording Code, when the provider has one
    pub isrc: Option<String>,
}

/// Simplified artist object embedded in tracks/albums
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

/// Simplified album object embedded in tracks
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    /// Cover images, largest first
    #[serde(default)]
    pub images: Vec<Image>,
}

/// An image reference
#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub url: String,
}

/// Response of `GET /tracks?ids=...` — one entry per requested id,
/// null for ids the provider does not know
#[derive(Debug, Clone, Deserialize)]
pub struct TracksResponse {
    #[serde(default)]
    pub tracks: Vec<Option<Track>>,
}

/// Full artist object from `GET /artists/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct FullArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// Response of the OAuth refresh-token grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until expiry
    pub expires_in: u64,
}

/// Error envelope returned by the API on non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub status: i32,
    pub message: String,
}

// ============================================================================
// CONTRACT TESTS
// These verify our DTOs match what the real API returns.
// If these fail, the API has changed and we need to update our DTOs.
// ============================================================================

#[cfg(test)]
mod contract_tests {
    use super::*;

    /// Test we can parse a recently-played page
    #[test]
    fn test_parse_recently_played() {
        let json = r#"{
            "items": [{
                "track": {
                    "id": "t1",
                    "name": "Song",
                    "duration_ms": 200000,
                    "external_ids": {"isrc": "ISRC1"},
                    "artists": [{"id": "a1", "name": "Artist"}],
                    "album": {"id": "al1", "name": "Album", "images": [{"url": "http://img"}]}
                },
                "played_at": "2024-01-01T00:00:00Z"
            }]
        }"#;

        let response: RecentlyPlayedResponse =
            serde_json::from_str(json).expect("Should parse recently-played page");

        assert_eq!(response.items.len(), 1);
        let item = &response.items[0];
        assert_eq!(item.track.id, "t1");
        assert_eq!(item.track.duration_ms, 200_000);
        assert_eq!(item.track.external_ids.isrc, Some("ISRC1".to_string()));
        assert_eq!(item.track.artists[0].id, "a1");
        assert_eq!(item.track.album.as_ref().unwrap().images[0].url, "http://img");
        assert_eq!(item.played_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    /// Test we handle a track with no ISRC, no album, and no artists
    #[test]
    fn test_parse_sparse_track() {
        let json = r#"{
            "id": "t2",
            "name": "Local File",
            "duration_ms": 1000
        }"#;

        let track: Track = serde_json::from_str(json).expect("Should parse sparse track");

        assert_eq!(track.id, "t2");
        assert!(track.external_ids.isrc.is_none());
        assert!(track.artists.is_empty());
        assert!(track.album.is_none());
    }

    /// Test the batch tracks endpoint returns null for unknown ids
    #[test]
    fn test_parse_tracks_response_with_null_entry() {
        let json = r#"{
            "tracks": [
                {"id": "t1", "name": "Song", "duration_ms": 1000},
                null
            ]
        }"#;

        let response: TracksResponse =
            serde_json::from_str(json).expect("Should parse tracks response");

        assert_eq!(response.tracks.len(), 2);
        assert!(response.tracks[0].is_some());
        assert!(response.tracks[1].is_none());
    }

    /// Test we can parse a token grant response (extra fields ignored)
    #[test]
    fn test_parse_token_response() {
        let json = r#"{
            "access_token": "BQabc",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "user-read-recently-played"
        }"#;

        let token: TokenResponse = serde_json::from_str(json).expect("Should parse token grant");

        assert_eq!(token.access_token, "BQabc");
        assert_eq!(token.expires_in, 3600);
    }

    /// Test we can parse the error envelope
    #[test]
    fn test_parse_error_envelope() {
        let json = r#"{
            "error": {"status": 429, "message": "API rate limit exceeded"}
        }"#;

        let err: ApiError = serde_json::from_str(json).expect("Should parse error envelope");

        assert_eq!(err.error.status, 429);
        assert_eq!(err.error.message, "API rate limit exceeded");
    }

    /// Test we can parse an empty recently-played page
    #[test]
    fn test_parse_empty_page() {
        let response: RecentlyPlayedResponse =
            serde_json::from_str(r#"{"items": []}"#).expect("Should parse empty page");
        assert!(response.items.is_empty());
    }
}
