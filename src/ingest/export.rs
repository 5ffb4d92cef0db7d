//! Bulk export file format.
//!
//! Spotify's "extended streaming history" export is a JSON array of records.
//! These types match EXACTLY what the export contains; every field the
//! pipeline does not consume is ignored. All consumed fields are optional in
//! the format itself - podcast episodes, for example, carry a null track URI
//! and null track name - so presence checks happen in the normalizer, not
//! here.
//!
//! Example record:
//! ```json
//! {
//!   "ts": "2024-01-01T00:00:00Z",
//!   "ms_played": 200000,
//!   "master_metadata_track_name": "Song",
//!   "master_metadata_album_artist_name": "Artist",
//!   "master_metadata_album_album_name": "Album",
//!   "spotify_track_uri": "spotify:track:t1"
//! }
//! ```

use serde::Deserialize;

use crate::error::{Error, Result};

/// One record of a streaming-history export file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRecord {
    /// Instant the play ended, ISO 8601
    pub ts: Option<String>,
    /// Milliseconds actually played
    #[serde(default)]
    pub ms_played: i64,
    pub master_metadata_track_name: Option<String>,
    pub master_metadata_album_artist_name: Option<String>,
    pub master_metadata_album_album_name: Option<String>,
    /// URI of the form `spotify:track:<id>`; null for podcast episodes
    pub spotify_track_uri: Option<String>,
}

/// Parse a raw export file payload.
///
/// The top level must be a JSON array - anything else is structurally fatal
/// and aborts the run before any store mutation. Individual records that
/// don't deserialize cleanly are kept as empty records so the normalizer
/// counts them as skips rather than failing the batch.
pub fn parse_export_json(payload: &str) -> Result<Vec<ExportRecord>> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| Error::invalid_input(format!("export payload is not valid JSON: {e}")))?;

    let serde_json::Value::Array(items) = value else {
        return Err(Error::invalid_input("export payload is not a JSON array"));
    };

    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item).unwrap_or_default())
        .collect())
}
