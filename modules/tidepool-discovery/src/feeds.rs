//! RSS/Atom frontier provider.
//!
//! Feeds are plain XML — fetched with reqwest and parsed with feed-rs, no
//! renderer involved. Each fresh entry becomes a query suggestion subject to
//! the same filter as everything else.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use tidepool_common::{host_of, FrontierItem, QuerySuggestion};

const FEED_MAX_ITEMS: usize = 10;
const FEED_MAX_AGE_DAYS: i64 = 30;

/// A single entry pulled from a feed.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub url: String,
    pub title: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Seam for feed retrieval; implemented by `FeedFetcher` and by the mock in
/// `testing`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>>;
}

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    /// Fetch and parse an RSS/Atom feed, returning the most recent entries.
    /// Entries older than the age cutoff are dropped; undated entries are kept.
    async fn fetch_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>> {
        let resp = self
            .client
            .get(feed_url)
            .send()
            .await
            .context("Feed fetch failed")?;
        let bytes = resp.bytes().await.context("Failed to read feed body")?;
        let feed = feed_rs::parser::parse(&bytes[..]).context("Failed to parse RSS/Atom feed")?;

        let cutoff = Utc::now() - chrono::Duration::days(FEED_MAX_AGE_DAYS);

        let mut entries: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

                let pub_date = entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc));

                if let Some(date) = pub_date {
                    if date < cutoff {
                        return None;
                    }
                }

                Some(FeedEntry {
                    url,
                    title: entry.title.map(|t| t.content),
                    pub_date,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        entries.truncate(FEED_MAX_ITEMS);

        info!(feed_url, entries = entries.len(), "Parsed feed");
        Ok(entries)
    }
}

/// Map feed entries onto suggestions attributed to the frontier item that
/// carried the feed URL. A `min_pub_date` hint tightens the age filter.
pub fn suggestions_from_entries(item: &FrontierItem, entries: &[FeedEntry]) -> Vec<QuerySuggestion> {
    entries
        .iter()
        .filter(|entry| match (item.meta.min_pub_date, entry.pub_date) {
            (Some(min), Some(published)) => published.date_naive() >= min,
            _ => true,
        })
        .map(|entry| QuerySuggestion {
            url: entry.url.clone(),
            host: host_of(&entry.url),
            angle: item.angle.clone(),
            generated_from: item.id,
        })
        .collect()
}
