//! Trait seams for the shared stores and the persistence collaborator.
//!
//! SeenIndex, CooldownStore, and CitationSink replace process-wide state —
//! all injected into the orchestrator and filter. In-memory implementations
//! back tests and single-node runs; durable backends live in the embedding
//! application.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use tidepool_common::{ExtractedDocument, OracleJudgment};

// ---------------------------------------------------------------------------
// SeenIndex — durable record of every canonical URL already processed
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SeenIndex: Send + Sync {
    async fn is_seen(&self, canonical_url: &str) -> Result<bool>;
    async fn mark_seen(&self, canonical_url: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySeenIndex {
    seen: Mutex<HashSet<String>>,
}

impl MemorySeenIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeenIndex for MemorySeenIndex {
    async fn is_seen(&self, canonical_url: &str) -> Result<bool> {
        Ok(self.seen.lock().expect("seen lock").contains(canonical_url))
    }

    async fn mark_seen(&self, canonical_url: &str) -> Result<()> {
        self.seen
            .lock()
            .expect("seen lock")
            .insert(canonical_url.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CooldownStore — per-host pacing table
// ---------------------------------------------------------------------------

/// Cooldown bookkeeping for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCooldown {
    pub last_seen_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

/// Outcome of an atomic claim attempt against a host's cooldown entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownClaim {
    /// Host was free; the cooldown window now starts at `now`.
    Claimed,
    /// Host is cooling down for another `remaining_ms`.
    Cooling { remaining_ms: i64 },
}

#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Atomic per-host check-and-set. If the host is not cooling down, claim
    /// it (set `cooldown_until = now + window`, `last_seen_at = now`) and
    /// return `Claimed`; otherwise leave the entry untouched and return the
    /// remaining time. The check and the mutation happen under one lock so
    /// two workers can never double-accept a host within the same tick.
    async fn try_claim(
        &self,
        host: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<CooldownClaim>;

    async fn get(&self, host: &str) -> Result<Option<HostCooldown>>;

    /// Force a cooldown without claiming (operator/block path).
    async fn mark(&self, host: &str, now: DateTime<Utc>, window: Duration) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCooldowns {
    hosts: Mutex<HashMap<String, HostCooldown>>,
}

impl MemoryCooldowns {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldowns {
    async fn try_claim(
        &self,
        host: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<CooldownClaim> {
        let mut hosts = self.hosts.lock().expect("cooldown lock");
        if let Some(entry) = hosts.get(host) {
            if entry.cooldown_until > now {
                return Ok(CooldownClaim::Cooling {
                    remaining_ms: (entry.cooldown_until - now).num_milliseconds(),
                });
            }
        }
        hosts.insert(
            host.to_string(),
            HostCooldown {
                last_seen_at: now,
                cooldown_until: now + window,
            },
        );
        Ok(CooldownClaim::Claimed)
    }

    async fn get(&self, host: &str) -> Result<Option<HostCooldown>> {
        Ok(self.hosts.lock().expect("cooldown lock").get(host).copied())
    }

    async fn mark(&self, host: &str, now: DateTime<Utc>, window: Duration) -> Result<()> {
        self.hosts.lock().expect("cooldown lock").insert(
            host.to_string(),
            HostCooldown {
                last_seen_at: now,
                cooldown_until: now + window,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CitationSink — the external persistence collaborator
// ---------------------------------------------------------------------------

/// A persist request keyed by canonical URL.
#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub collection_id: String,
    pub canonical_url: String,
    pub document: ExtractedDocument,
    pub judgment: Option<OracleJudgment>,
    pub score: f64,
}

/// Distinguishable persist outcomes. A duplicate canonical URL is rejected,
/// not overwritten, and the pipeline counts it as a duplicate, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    AlreadyExists,
}

#[async_trait]
pub trait CitationSink: Send + Sync {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistOutcome>;

    /// Liveness probe. A dead sink is a configuration-level failure that
    /// pauses the whole run, unlike any per-item error.
    async fn healthy(&self) -> bool;
}

#[derive(Default)]
pub struct MemoryCitationSink {
    citations: Mutex<HashMap<String, PersistRequest>>,
}

impl MemoryCitationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.citations.lock().expect("sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn persisted_urls(&self) -> Vec<String> {
        self.citations
            .lock()
            .expect("sink lock")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CitationSink for MemoryCitationSink {
    async fn persist(&self, request: &PersistRequest) -> Result<PersistOutcome> {
        let mut citations = self.citations.lock().expect("sink lock");
        if citations.contains_key(&request.canonical_url) {
            return Ok(PersistOutcome::AlreadyExists);
        }
        citations.insert(request.canonical_url.clone(), request.clone());
        Ok(PersistOutcome::Persisted)
    }

    async fn healthy(&self) -> bool {
        true
    }
}
