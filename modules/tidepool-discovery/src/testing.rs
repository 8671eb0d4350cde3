//! Deterministic doubles for the pipeline's seams.
//!
//! No network, no renderer, no oracle service — `cargo test` in seconds.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use tidepool_common::OracleJudgment;

use crate::feeds::{FeedEntry, FeedSource};
use crate::fetcher::{FetchResult, Fetcher, ERR_TRANSPORT};
use crate::oracle::ScoringOracle;
use crate::stores::{CitationSink, PersistOutcome, PersistRequest};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Scripted fetcher: URL → canned result. Unknown URLs fail as transport
/// errors. Records every requested URL.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, FetchResult>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.responses.lock().expect("mock lock").insert(
            url.to_string(),
            FetchResult {
                ok: true,
                status: Some(200),
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: html.to_string(),
                final_url: url.to_string(),
                ms: 5,
                error: None,
            },
        );
        self
    }

    pub fn with_result(self, url: &str, result: FetchResult) -> Self {
        self.responses
            .lock()
            .expect("mock lock")
            .insert(url.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        self.calls.lock().expect("mock lock").push(url.to_string());
        self.responses
            .lock()
            .expect("mock lock")
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchResult {
                ok: false,
                final_url: url.to_string(),
                error: Some(ERR_TRANSPORT.to_string()),
                ..Default::default()
            })
    }
}

// ---------------------------------------------------------------------------
// MockOracle
// ---------------------------------------------------------------------------

/// Oracle double: either a fixed judgment or a hard failure.
pub struct MockOracle {
    judgment: Option<OracleJudgment>,
}

impl MockOracle {
    pub fn returning(judgment: OracleJudgment) -> Self {
        Self {
            judgment: Some(judgment),
        }
    }

    pub fn failing() -> Self {
        Self { judgment: None }
    }

    /// A judgment that passes shape validation.
    pub fn good_judgment() -> OracleJudgment {
        OracleJudgment {
            summary: "A detailed account of the decision and the parties involved in making it."
                .to_string(),
            key_facts: vec![
                "The vote passed 7-2.".to_string(),
                "The change takes effect in March.".to_string(),
            ],
            tags: vec!["governance".to_string()],
        }
    }
}

#[async_trait]
impl ScoringOracle for MockOracle {
    async fn judge(&self, _text: &str, _context: &str) -> Result<OracleJudgment> {
        match &self.judgment {
            Some(judgment) => Ok(judgment.clone()),
            None => anyhow::bail!("oracle offline"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// MockFeeds
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockFeeds {
    entries: Mutex<HashMap<String, Vec<FeedEntry>>>,
}

impl MockFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, url: &str, entries: Vec<FeedEntry>) -> Self {
        self.entries
            .lock()
            .expect("mock lock")
            .insert(url.to_string(), entries);
        self
    }
}

#[async_trait]
impl FeedSource for MockFeeds {
    async fn fetch_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>> {
        self.entries
            .lock()
            .expect("mock lock")
            .get(feed_url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such feed: {feed_url}"))
    }
}

// ---------------------------------------------------------------------------
// FlakySink — persistence collaborator that goes away
// ---------------------------------------------------------------------------

/// Sink whose health can be toggled, for exercising the run-pause path.
#[derive(Default)]
pub struct FlakySink {
    healthy: std::sync::atomic::AtomicBool,
    persisted: Mutex<Vec<String>>,
}

impl FlakySink {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: std::sync::atomic::AtomicBool::new(healthy),
            persisted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy
            .store(healthy, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CitationSink for FlakySink {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistOutcome> {
        if !self.healthy().await {
            anyhow::bail!("sink unreachable");
        }
        let mut persisted = self.persisted.lock().expect("sink lock");
        if persisted.contains(&request.canonical_url) {
            return Ok(PersistOutcome::AlreadyExists);
        }
        persisted.push(request.canonical_url.clone());
        Ok(PersistOutcome::Persisted)
    }

    async fn healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// A small on-topic article fixture used across tests.
pub fn article_html(title: &str, topic_sentence: &str) -> String {
    format!(
        r#"<html><head><title>{title}</title>
        <meta property="og:site_name" content="Example Tribune">
        </head><body><article>
        <p>{topic_sentence} The issue has drawn sustained attention from residents,
        and officials at City Hall say a final decision is expected within weeks.</p>
        <p>Supporters point to three independent studies released since January,
        while opponents cite costs projected at four million dollars over ten years.</p>
        </article></body></html>"#
    )
}
