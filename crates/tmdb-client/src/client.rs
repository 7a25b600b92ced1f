//! TMDB API client with rate limiting and retry logic.

use super::rate_limiter::RateLimiter;
use super::types::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::config::{Config, TmdbConfig};
use shared::source::{CatalogSource, SourceMovie, SourceSeason, SourceShow};
use shared::{Result, TrackerError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// TMDB v3 client
pub struct TmdbClient {
    client: Client,
    base_url: String,
    /// Checked on first request so key-less commands still work
    api_key: Option<String>,
    /// Shared by every request issued through this client
    rate_limiter: Mutex<RateLimiter>,
    max_retries: u32,
    /// Base delay for retry (exponential backoff)
    retry_delay_ms: u64,
}

impl TmdbClient {
    /// Create a client; a missing API key surfaces on the first request
    pub fn new(settings: &TmdbConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .user_agent(concat!("show-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: Mutex::new(RateLimiter::new(
                settings.rate_limit.requests_per_second,
                settings.rate_limit.requests_per_minute,
            )),
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        })
    }

    /// Create a client from the `[tmdb]` section and the effective API key
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.tmdb, config.tmdb_api_key())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }

    /// GET with rate limiting; retries transport errors, 429 and 5xx
    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            TrackerError::Configuration(format!(
                "no TMDB API key: set tmdb.api_key or {}",
                shared::config::API_KEY_ENV
            ))
        })?;
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            self.rate_limiter.lock().await.acquire().await;

            debug!(url = %url, attempt = attempt + 1, "Making API request");

            match self
                .client
                .get(&url)
                .query(&[("api_key", api_key)])
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            warn!(url = %url, error = %e, "Failed to parse response");
                            TrackerError::SourceUnavailable(format!("invalid response from {}: {}", endpoint, e))
                        });
                    }

                    let message = response
                        .json::<StatusMessage>()
                        .await
                        .ok()
                        .and_then(|body| body.status_message)
                        .unwrap_or_else(|| status.to_string());

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(TrackerError::Configuration(format!(
                            "TMDB rejected the API key: {}",
                            message
                        )));
                    }

                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        warn!(url = %url, status = %status, error = %message, "Request failed");
                        return Err(TrackerError::SourceUnavailable(format!(
                            "{} returned {}: {}",
                            endpoint, status, message
                        )));
                    }

                    warn!(url = %url, status = %status, error = %message, "Request failed, may retry");
                    last_error = format!("{} returned {}: {}", endpoint, status, message);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Request error");
                    last_error = format!("request to {} failed: {}", endpoint, e);
                }
            }

            if attempt < self.max_retries {
                let delay = self.backoff(attempt);
                debug!(delay_ms = delay.as_millis(), "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(TrackerError::SourceUnavailable(format!(
            "{} (after {} retries)",
            last_error, self.max_retries
        )))
    }

    /// Number of requests sent in the last minute
    pub async fn requests_last_minute(&self) -> usize {
        self.rate_limiter.lock().await.current_minute_count()
    }
}

#[async_trait]
impl CatalogSource for TmdbClient {
    async fn fetch_show(&self, show_id: i64) -> Result<SourceShow> {
        info!(show_id, "Fetching show details");
        let details: TvDetails = self.get(&format!("/tv/{}", show_id)).await?;
        Ok(details.into())
    }

    async fn fetch_season(&self, show_id: i64, season_number: u32) -> Result<SourceSeason> {
        debug!(show_id, season_number, "Fetching season details");
        let details: TvSeasonDetails = self
            .get(&format!("/tv/{}/season/{}", show_id, season_number))
            .await?;
        Ok(details.into())
    }

    async fn fetch_movie(&self, movie_id: i64) -> Result<SourceMovie> {
        info!(movie_id, "Fetching movie details");
        let details: MovieDetails = self.get(&format!("/movie/{}", movie_id)).await?;
        Ok(details.into())
    }
}
