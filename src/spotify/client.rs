//! Spotify HTTP client
//!
//! Handles communication with the Spotify Web API: token refresh via the
//! OAuth refresh-token grant, the recently-played page, batch track lookups,
//! and single artist lookups for image backfill.
//!
//! Rate limiting: the API signals HTTP 429. The client waits a fixed backoff
//! and retries that specific call exactly once; a second 429 surfaces as
//! [`SpotifyError::RateLimited`]. No other error class is retried.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::warn;

use super::dto;

/// User agent string for API requests
const USER_AGENT: &str = concat!("playlog/", env!("CARGO_PKG_VERSION"));

/// Refresh the access token this long before its stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Errors that can occur talking to the provider
#[derive(Debug, thiserror::Error)]
pub enum SpotifyError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Rate limited - try again later")]
    RateLimited,
}

/// A cached access token with its refresh deadline
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Spotify Web API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    api_base: String,
    accounts_base: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<CachedToken>>,
    rate_limit_backoff: Duration,
}

impl SpotifyClient {
    /// Create a new client for the given OAuth credentials.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http_client,
            api_base: "https://api.spotify.com/v1".to_string(),
            accounts_base: "https://accounts.spotify.com".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            token: Mutex::new(None),
            rate_limit_backoff: Duration::from_secs(30),
        }
    }

    /// Override the fixed wait before the single 429 retry.
    pub fn rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    /// Create a client for testing with custom base URLs
    #[cfg(test)]
    pub fn with_base_urls(api_base: impl Into<String>, accounts_base: impl Into<String>) -> Self {
        let mut client = Self::new("test-id", "test-secret", "test-refresh");
        client.api_base = api_base.into();
        client.accounts_base = accounts_base.into();
        client.rate_limit_backoff = Duration::from_millis(1);
        client
    }

    /// Fetch the latest recently-played page.
    ///
    /// `after` bounds the lookback window; the provider only returns plays
    /// strictly newer than it.
    pub async fn recently_played(
        &self,
        after: DateTime<Utc>,
        limit: u8,
    ) -> Result<dto::RecentlyPlayedResponse, SpotifyError> {
        let url = format!(
            "{}/me/player/recently-played?limit={}&after={}",
            self.api_base,
            limit,
            after.timestamp()
        );
        self.get_json(&url).await
    }

    /// Resolve full track objects for up to 50 provider ids.
    ///
    /// The response has one entry per requested id; unknown ids come back as
    /// `None` and are a skip, not an error.
    pub async fn tracks(&self, ids: &[String]) -> Result<Vec<Option<dto::Track>>, SpotifyError> {
        let url = format!("{}/tracks?ids={}", self.api_base, ids.join(","));
        let response: dto::TracksResponse = self.get_json(&url).await?;
        Ok(response.tracks)
    }

    /// Fetch one artist, including images.
    pub async fn artist(&self, id: &str) -> Result<dto::FullArtist, SpotifyError> {
        let url = format!("{}/artists/{}", self.api_base, id);
        self.get_json(&url).await
    }

    /// Send one authenticated GET and parse the response, retrying exactly
    /// once after the fixed backoff if the provider answers 429.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyError> {
        match self.get_json_once(url).await {
            Err(SpotifyError::RateLimited) => {
                warn!(
                    backoff_secs = self.rate_limit_backoff.as_secs(),
                    "Rate limited, backing off before single retry"
                );
                tokio::time::sleep(self.rate_limit_backoff).await;
                self.get_json_once(url).await
            }
            other => other,
        }
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyError> {
        let token = self.access_token().await?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| SpotifyError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SpotifyError::RateLimited);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SpotifyError::Auth("access token rejected".to_string()));
        }

        if !status.is_success() {
            // Try to parse the API's error envelope
            if let Ok(error) = response.json::<dto::ApiError>().await {
                return Err(SpotifyError::Api(error.error.message));
            }
            return Err(SpotifyError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SpotifyError::Parse(e.to_string()))
    }

    /// Get a usable access token, refreshing through the OAuth refresh-token
    /// grant when the cached one is missing or about to expire.
    async fn access_token(&self) -> Result<String, SpotifyError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let url = format!("{}/api/token", self.accounts_base);
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SpotifyError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SpotifyError::Auth(format!(
                "token refresh failed with HTTP {}",
                response.status()
            )));
        }

        let grant: dto::TokenResponse = response
            .json()
            .await
            .map_err(|e| SpotifyError::Parse(e.to_string()))?;

        let expires_at = Instant::now()
            + Duration::from_secs(grant.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken { access_token: grant.access_token.clone(), expires_at });

        Ok(grant.access_token)
    }
}
