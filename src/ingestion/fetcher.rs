//! Retrying page fetcher with politeness delays.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::config::CrawlConfig;
use crate::retry::{RetryClass, RetryPolicy, classify_reqwest, retryable_status};
use crate::types::{FetchFailure, PageFetchResult, RagError};

/// One attempt's failure, before classification into a [`FetchFailure`].
#[derive(Debug)]
enum AttemptError {
    Transport(reqwest::Error),
    Status(StatusCode),
}

/// Fetches raw page content over HTTP.
///
/// Connection errors, timeouts, and 429/502/503/504 responses are retried
/// with exponential backoff and jitter up to the configured ceiling. Any
/// other status, or an exhausted retry budget, produces a
/// `success = false` result with a classified failure; the fetch stage
/// never raises.
pub struct PageFetcher {
    client: Client,
    policy: RetryPolicy,
    request_delay: Duration,
    max_concurrent: usize,
}

impl PageFetcher {
    /// Build a fetcher with its own HTTP client from crawl configuration.
    pub fn new(config: &CrawlConfig) -> Result<Self, RagError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Build a fetcher around an existing client (used by tests).
    pub fn with_client(client: Client, config: &CrawlConfig) -> Self {
        Self {
            client,
            policy: config.retry_policy(),
            request_delay: config.request_delay,
            max_concurrent: config.max_concurrent_fetches.max(1),
        }
    }

    /// Parse and normalize a raw URL string: http(s) only, fragment dropped.
    pub fn normalize_url(raw: &str) -> Result<Url, FetchFailure> {
        let mut url =
            Url::parse(raw.trim()).map_err(|_| FetchFailure::InvalidUrl(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchFailure::InvalidUrl(raw.to_string()));
        }
        url.set_fragment(None);
        Ok(url)
    }

    /// Fetch one URL, retrying transient failures.
    pub async fn fetch(&self, url: &Url) -> PageFetchResult {
        let outcome = self
            .policy
            .run(
                || async {
                    let response = self
                        .client
                        .get(url.clone())
                        .send()
                        .await
                        .map_err(AttemptError::Transport)?;
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await.map_err(AttemptError::Transport)?;
                        Ok((status.as_u16(), body))
                    } else {
                        Err(AttemptError::Status(status))
                    }
                },
                |err| match err {
                    AttemptError::Transport(e) => classify_reqwest(e),
                    AttemptError::Status(status) => {
                        if retryable_status(*status) {
                            RetryClass::Retryable
                        } else {
                            RetryClass::Fatal
                        }
                    }
                },
            )
            .await;

        match outcome {
            Ok((status, body)) => {
                tracing::debug!(url = %url, status, bytes = body.len(), "fetched page");
                PageFetchResult::success(url.clone(), body, status)
            }
            Err(AttemptError::Status(status)) => {
                let failure = if retryable_status(status) {
                    FetchFailure::RetriesExhausted {
                        attempts: self.policy.max_attempts,
                        last_status: Some(status.as_u16()),
                    }
                } else {
                    FetchFailure::Status(status.as_u16())
                };
                tracing::warn!(url = %url, %failure, "fetch failed");
                PageFetchResult::failure(url.clone(), Some(status.as_u16()), failure)
            }
            Err(AttemptError::Transport(err)) => {
                let failure = if err.is_timeout() {
                    FetchFailure::Timeout
                } else if err.is_connect() {
                    FetchFailure::Connect
                } else {
                    FetchFailure::Other(err.to_string())
                };
                tracing::warn!(url = %url, %failure, "fetch failed");
                PageFetchResult::failure(url.clone(), None, failure)
            }
        }
    }

    /// Fetch a batch of raw URL strings with bounded concurrency.
    ///
    /// Invalid URLs become failure records without touching the network.
    /// Results come back in input order. Each worker sleeps the politeness
    /// delay after finishing a request, so a worker slot never hits the
    /// remote host back-to-back.
    pub async fn fetch_many(&self, raw_urls: &[String]) -> Vec<PageFetchResult> {
        let tasks = raw_urls.iter().map(|raw| async move {
            match Self::normalize_url(raw) {
                Ok(url) => {
                    let result = self.fetch(&url).await;
                    if !self.request_delay.is_zero() {
                        tokio::time::sleep(self.request_delay).await;
                    }
                    result
                }
                Err(failure) => {
                    tracing::warn!(raw = %raw, %failure, "skipping unfetchable url");
                    // Placeholder origin so the record still carries an address.
                    let url =
                        Url::parse("invalid://unparsed").expect("static placeholder url parses");
                    PageFetchResult::failure(url, None, failure)
                }
            }
        });

        stream::iter(tasks)
            .buffered(self.max_concurrent)
            .collect()
            .await
    }
}
