//! Robust single-URL fetcher.
//!
//! Checks robots before touching the network, gates on content type, retries
//! transport failures with exponential backoff plus jitter, and never lets an
//! error escape its boundary — every failure mode is encoded in `FetchResult`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::robots::RobotsCache;

/// Base backoff duration for transient retries. Actual delay is
/// base * 3^attempt + jitter (0–500ms).
const RETRY_BASE: Duration = Duration::from_millis(500);

pub const ERR_ROBOTS: &str = "robots_disallowed";
pub const ERR_CONTENT_TYPE: &str = "content_type_unsupported";
pub const ERR_TIMEOUT: &str = "timeout";
pub const ERR_TRANSPORT: &str = "transport";

#[derive(Debug, Clone, TypedBuilder)]
pub struct FetchOptions {
    #[builder(default = Duration::from_secs(10))]
    pub connect_timeout: Duration,
    #[builder(default = Duration::from_secs(20))]
    pub read_timeout: Duration,
    #[builder(default = 2)]
    pub max_retries: u32,
    #[builder(default = String::from("tidepool-discovery/0.1"))]
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions::builder().build()
    }
}

/// Outcome of one fetch. `ok` is true only for a 2xx HTML/XHTML response.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: String,
    pub final_url: String,
    pub ms: u64,
    pub error: Option<String>,
}

impl FetchResult {
    fn failure(url: &str, error: &str, ms: u64) -> Self {
        Self {
            ok: false,
            final_url: url.to_string(),
            ms,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Seam for the orchestrator; implemented by `RobustFetcher` and by the mock
/// in `testing`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

/// What to do with one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptDisposition {
    Success,
    /// Definitive failure — retrying cannot change it.
    Terminal(&'static str),
    /// Transient failure — retry with backoff.
    Retry(&'static str),
}

/// Only HTML/XHTML is fetchable content for this pipeline; anything else is a
/// terminal policy failure even on HTTP 2xx.
pub(crate) fn classify_response(status: u16, content_type: Option<&str>) -> AttemptDisposition {
    if status >= 500 || status == 429 {
        return AttemptDisposition::Retry(ERR_TRANSPORT);
    }
    if !(200..300).contains(&status) {
        return AttemptDisposition::Terminal(ERR_TRANSPORT);
    }
    let supported = content_type
        .map(|ct| {
            let ct = ct.to_lowercase();
            ct.starts_with("text/html") || ct.starts_with("application/xhtml+xml")
        })
        .unwrap_or(false);
    if supported {
        AttemptDisposition::Success
    } else {
        AttemptDisposition::Terminal(ERR_CONTENT_TYPE)
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let backoff = RETRY_BASE * 3u32.pow(attempt);
    let jitter = Duration::from_millis(rand::rng().random_range(0..500));
    backoff + jitter
}

// ---------------------------------------------------------------------------
// RobustFetcher
// ---------------------------------------------------------------------------

pub struct RobustFetcher {
    client: reqwest::Client,
    robots: RobotsCache,
    opts: FetchOptions,
}

impl RobustFetcher {
    pub fn new(opts: FetchOptions) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(opts.connect_timeout)
            .timeout(opts.read_timeout)
            .user_agent(opts.user_agent.clone())
            .build()
            .expect("Failed to build fetch HTTP client");
        Self {
            robots: RobotsCache::new(client.clone()),
            client,
            opts,
        }
    }

    async fn attempt(&self, url: &str) -> Result<(AttemptDisposition, FetchResult), &'static str> {
        let started = Instant::now();
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ERR_TIMEOUT),
            Err(_) => return Err(ERR_TRANSPORT),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let disposition = classify_response(status, content_type.as_deref());

        let body = if disposition == AttemptDisposition::Success {
            match response.text().await {
                Ok(body) => body,
                Err(_) => return Err(ERR_TRANSPORT),
            }
        } else {
            String::new()
        };

        let result = FetchResult {
            ok: disposition == AttemptDisposition::Success,
            status: Some(status),
            content_type,
            body,
            final_url,
            ms: started.elapsed().as_millis() as u64,
            error: match disposition {
                AttemptDisposition::Success => None,
                AttemptDisposition::Terminal(e) | AttemptDisposition::Retry(e) => {
                    Some(e.to_string())
                }
            },
        };
        Ok((disposition, result))
    }
}

#[async_trait]
impl Fetcher for RobustFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        let started = Instant::now();

        // Robots is a policy gate: a disallow short-circuits with no network
        // call against the page and no retries.
        if !self.robots.is_allowed(url).await {
            info!(url, "Robots disallow, skipping fetch");
            return FetchResult::failure(url, ERR_ROBOTS, started.elapsed().as_millis() as u64);
        }

        let mut last_error = ERR_TRANSPORT;
        for attempt in 0..=self.opts.max_retries {
            match self.attempt(url).await {
                Ok((AttemptDisposition::Success, result)) => {
                    info!(url, status = result.status, bytes = result.body.len(), "Fetched");
                    return result;
                }
                Ok((AttemptDisposition::Terminal(_), result)) => {
                    info!(url, status = result.status, error = result.error.as_deref(), "Fetch failed terminally");
                    return result;
                }
                Ok((AttemptDisposition::Retry(e), result)) => {
                    last_error = e;
                    if attempt < self.opts.max_retries {
                        let delay = backoff_with_jitter(attempt);
                        warn!(
                            url,
                            attempt = attempt + 1,
                            status = result.status,
                            backoff_ms = delay.as_millis() as u64,
                            "Transient fetch failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    last_error = e;
                    if attempt < self.opts.max_retries {
                        let delay = backoff_with_jitter(attempt);
                        warn!(
                            url,
                            attempt = attempt + 1,
                            error = e,
                            backoff_ms = delay.as_millis() as u64,
                            "Transport failure, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        FetchResult::failure(url, last_error, started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_is_terminal_even_on_200() {
        assert_eq!(
            classify_response(200, Some("application/pdf")),
            AttemptDisposition::Terminal(ERR_CONTENT_TYPE)
        );
    }

    #[test]
    fn html_variants_succeed() {
        assert_eq!(
            classify_response(200, Some("text/html; charset=utf-8")),
            AttemptDisposition::Success
        );
        assert_eq!(
            classify_response(200, Some("application/xhtml+xml")),
            AttemptDisposition::Success
        );
    }

    #[test]
    fn missing_content_type_is_terminal() {
        assert_eq!(
            classify_response(200, None),
            AttemptDisposition::Terminal(ERR_CONTENT_TYPE)
        );
    }

    #[test]
    fn server_errors_and_rate_limits_retry() {
        assert_eq!(
            classify_response(503, Some("text/html")),
            AttemptDisposition::Retry(ERR_TRANSPORT)
        );
        assert_eq!(
            classify_response(429, Some("text/html")),
            AttemptDisposition::Retry(ERR_TRANSPORT)
        );
    }

    #[test]
    fn client_errors_are_terminal() {
        assert_eq!(
            classify_response(404, Some("text/html")),
            AttemptDisposition::Terminal(ERR_TRANSPORT)
        );
    }

    #[test]
    fn backoff_grows_exponentially() {
        let first = backoff_with_jitter(0);
        let third = backoff_with_jitter(2);
        assert!(first < Duration::from_millis(1001));
        assert!(third >= Duration::from_millis(4500), "3^2 * 500ms floor: {third:?}");
    }

    #[test]
    fn default_options() {
        let opts = FetchOptions::default();
        assert_eq!(opts.max_retries, 2);
        assert!(opts.user_agent.contains("tidepool"));
    }
}
