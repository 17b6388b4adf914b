//! HTTP fetcher for downloading upstream rule lists.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

const TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 2000;

/// Maximum size per upstream list (32 MB)
const MAX_SOURCE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum total size for all downloads combined (512 MB)
const MAX_TOTAL_SIZE: usize = 512 * 1024 * 1024;

/// Maximum concurrent HTTP requests to upstream servers
pub const MAX_CONCURRENT_REQUESTS: usize = 6;

/// Retrieves the raw bytes of an upstream list.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP client for fetching lists
pub struct Fetcher {
    client: Client,
    /// Cumulative download size tracker (thread-safe for concurrent fetches)
    total_downloaded: AtomicUsize,
}

impl Fetcher {
    /// Create a new fetcher with default settings
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("ruleset-sync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            total_downloaded: AtomicUsize::new(0),
        })
    }

    /// Get the total bytes downloaded so far
    pub fn total_downloaded(&self) -> usize {
        self.total_downloaded.load(Ordering::Relaxed)
    }

    /// Fetch content with retry logic and size validation
    async fn fetch_with_retry(&self, url: &str, max_size: usize) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_DELAY_MS * (1 << (attempt - 1));
                debug!("Retry {} after {}ms for {}", attempt, delay, url);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        last_error = Some(anyhow!("HTTP {}", response.status()));
                        continue;
                    }
                    if let Some(content_length) = response.content_length() {
                        check_limits(content_length as usize, max_size, self.total_downloaded())?;
                    }

                    let body = response
                        .bytes()
                        .await
                        .context("Failed to read response body")?;
                    check_limits(body.len(), max_size, self.total_downloaded())?;
                    self.total_downloaded.fetch_add(body.len(), Ordering::Relaxed);

                    return Ok(body.to_vec());
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Unknown error")))
    }
}

#[async_trait]
impl SourceFetcher for Fetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_with_retry(url, MAX_SOURCE_SIZE).await
    }
}

// Note: Default is intentionally not implemented for Fetcher
// because new() can fail and we want explicit error handling.

/// Reject a body of `len` bytes that exceeds the per-file or cumulative limit.
fn check_limits(len: usize, max_size: usize, already_downloaded: usize) -> Result<()> {
    if len > max_size {
        return Err(anyhow!(
            "Response too large: {} bytes (max: {} bytes)",
            len,
            max_size
        ));
    }
    if already_downloaded.saturating_add(len) > MAX_TOTAL_SIZE {
        return Err(anyhow!(
            "Cumulative download limit exceeded: {} + {} > {} bytes",
            already_downloaded,
            len,
            MAX_TOTAL_SIZE
        ));
    }
    Ok(())
}
