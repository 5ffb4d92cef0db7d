//! Entity normalizer - pure transformation functions, no I/O.
//!
//! Converts one external track representation into the row set needed to
//! represent it in the catalog. Two input shapes exist:
//!
//! - the live-API track object, which carries full artist/album structure and
//!   normalizes into rows for all five catalog tables;
//! - the flattened export record, which carries only coarse name strings and
//!   a track URI, and normalizes into a listen candidate alone. Catalog
//!   enrichment for export records happens later via batch track lookups.
//!
//! Malformed individual inputs are a skip (`None`), never an error.

use chrono::{DateTime, Utc};

use crate::ingest::export::ExportRecord;
use crate::model::{Album, AlbumArtist, AlbumTrack, Artist, NewListen, Track, TrackArtist};
use crate::spotify::dto;

/// The row set one live-API track object expands into.
#[derive(Debug, Clone)]
pub struct NormalizedTrack {
    pub track: Track,
    pub artists: Vec<Artist>,
    pub album: Option<Album>,
    pub track_artists: Vec<TrackArtist>,
    pub album_track: Option<AlbumTrack>,
    pub album_artists: Vec<AlbumArtist>,
}

/// Canonical track identity: the provider's ISRC when present, otherwise a
/// synthetic `spotify_<track id>` fallback.
///
/// Two provider ids sharing an ISRC intentionally collapse to one recording.
pub fn canonical_isrc(track: &dto::Track) -> String {
    match &track.external_ids.isrc {
        Some(isrc) => isrc.clone(),
        None => format!("spotify_{}", track.id),
    }
}

/// Expand one live-API track object into catalog rows.
///
/// Artists are attached to the album transitively through the track: every
/// credited track artist becomes an album artist too. That is a
/// simplification the caller accepts.
pub fn normalize_track(track: &dto::Track) -> NormalizedTrack {
    let isrc = canonical_isrc(track);

    let artists: Vec<Artist> = track
        .artists
        .iter()
        .map(|a| Artist { id: a.id.clone(), name: a.name.clone(), image_url: None })
        .collect();

    let track_artists: Vec<TrackArtist> = track
        .artists
        .iter()
        .map(|a| TrackArtist { track_isrc: isrc.clone(), artist_id: a.id.clone() })
        .collect();

    let album = track.album.as_ref().map(|al| Album {
        id: al.id.clone(),
        name: al.name.clone(),
        image_url: al.images.first().map(|i| i.url.clone()),
    });

    let album_track = track.album.as_ref().map(|al| AlbumTrack {
        album_id: al.id.clone(),
        track_id: track.id.clone(),
        track_isrc: isrc.clone(),
    });

    let album_artists: Vec<AlbumArtist> = match &track.album {
        Some(al) => track
            .artists
            .iter()
            .map(|a| AlbumArtist { album_id: al.id.clone(), artist_id: a.id.clone() })
            .collect(),
        None => Vec::new(),
    };

    NormalizedTrack {
        track: Track { isrc, name: track.name.clone(), duration_ms: track.duration_ms },
        artists,
        album,
        track_artists,
        album_track,
        album_artists,
    }
}

/// Extract the track id from a `...:track:<id>` URI.
pub fn track_id_from_uri(uri: &str) -> Option<&str> {
    let (head, id) = uri.rsplit_once(':')?;
    let kind = head.rsplit(':').next()?;
    (kind == "track" && !id.is_empty()).then_some(id)
}

/// Normalize one export record into a listen candidate.
///
/// Returns `None` (a skip) when any of the four required fields is absent -
/// the export format allows partial records such as podcast episodes - or
/// when the URI or timestamp doesn't parse. The export shape produces no
/// catalog rows; only the listen.
pub fn normalize_export_record(record: &ExportRecord) -> Option<NewListen> {
    record.master_metadata_track_name.as_ref()?;
    record.master_metadata_album_artist_name.as_ref()?;
    record.master_metadata_album_album_name.as_ref()?;
    let uri = record.spotify_track_uri.as_ref()?;
    let track_id = track_id_from_uri(uri)?;
    let played_at = parse_timestamp(record.ts.as_ref()?)?;

    Some(NewListen {
        track_id: track_id.to_string(),
        duration_ms: record.ms_played,
        played_at,
        imported: true,
    })
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.with_timezone(&Utc))
}
