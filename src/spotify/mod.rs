//! Spotify Web API integration.
//!
//! Split into:
//! - `dto`: types matching the API responses exactly
//! - `client`: HTTP client with token refresh and rate-limit handling
//!
//! Everything downstream of this module works with catalog entities; DTO
//! types cross the boundary only into the normalizer.

pub mod client;
pub mod dto;

pub use client::{SpotifyClient, SpotifyError};
