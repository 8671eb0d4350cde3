//! The discovery control loop.
//!
//! Drains the frontier in ticks: dequeue a bounded batch, process items
//! concurrently, throttle, repeat. Every candidate gets exactly one audit
//! trail per attempt, closed with a terminal decision. A single item can
//! never crash the run — every per-item failure is caught at the worker
//! boundary and converted into an error step.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tidepool_common::{
    canonical_url, host_of, AuditStepType, Config, Cursor, Decision, FrontierItem, ProgressEvent,
    Provider, QuerySuggestion,
};

use crate::audit::AuditRecorder;
use crate::control::{ControlAction, ControlQueue};
use crate::expansion::QueryExpander;
use crate::extractor;
use crate::feeds::FeedSource;
use crate::fetcher::{FetchResult, Fetcher, ERR_CONTENT_TYPE, ERR_ROBOTS};
use crate::filter::{SuggestionFilter, SkipReason};
use crate::frontier::Frontier;
use crate::gate::RelevanceGate;
use crate::oracle::{judge_with_fallback, ScoringOracle};
use crate::progress::ProgressBus;
use crate::stats::RunStats;
use crate::stores::{CitationSink, CooldownStore, PersistOutcome, PersistRequest, SeenIndex};

/// An item is abandoned after this many dequeues.
const MAX_ITEM_ATTEMPTS: u32 = 3;
/// Priority bump for operator-pinned seeds.
const PIN_PRIORITY: i32 = 10;
/// Priority bump applied to suggestions whose angle an operator boosted.
const ANGLE_BOOST: i32 = 2;
/// Sleep while paused before re-checking the flag.
const PAUSE_POLL_MS: u64 = 200;

// ---------------------------------------------------------------------------
// Pacing knobs
// ---------------------------------------------------------------------------

/// Runtime-adjustable backpressure controls. Pause lets in-flight items
/// finish but blocks new dequeues; stop ends the run at the next tick
/// boundary.
pub struct PacingKnobs {
    throttle_ms: AtomicU64,
    max_items_per_tick: AtomicUsize,
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl PacingKnobs {
    pub fn new(throttle_ms: u64, max_items_per_tick: usize) -> Self {
        Self {
            throttle_ms: AtomicU64::new(throttle_ms),
            max_items_per_tick: AtomicUsize::new(max_items_per_tick),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn set_throttle_ms(&self, ms: u64) {
        self.throttle_ms.store(ms, Ordering::SeqCst);
    }

    pub fn throttle_ms(&self) -> u64 {
        self.throttle_ms.load(Ordering::SeqCst)
    }

    pub fn set_max_items_per_tick(&self, n: usize) {
        self.max_items_per_tick.store(n.max(1), Ordering::SeqCst);
    }

    pub fn max_items_per_tick(&self) -> usize {
        self.max_items_per_tick.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation: workers observe this at their next dequeue
    /// boundary; nothing is killed mid-item.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Injected collaborators — every seam the pipeline touches.
pub struct OrchestratorDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub feeds: Arc<dyn FeedSource>,
    pub oracle: Arc<dyn ScoringOracle>,
    pub seen: Arc<dyn SeenIndex>,
    pub cooldowns: Arc<dyn CooldownStore>,
    pub sink: Arc<dyn CitationSink>,
    pub recorder: Arc<AuditRecorder>,
    pub bus: Arc<ProgressBus>,
    pub controls: Arc<ControlQueue>,
}

pub struct Orchestrator {
    config: Config,
    gate: RelevanceGate,
    frontier: Arc<Frontier>,
    expander: QueryExpander,
    filter: SuggestionFilter,
    knobs: Arc<PacingKnobs>,
    deps: OrchestratorDeps,

    seeds: Mutex<HashSet<String>>,
    blocked_hosts: Mutex<HashSet<String>>,
    boosted_angles: Mutex<HashSet<String>>,
    skipped_angles: Mutex<HashSet<String>>,
    persisted_hosts: Mutex<HashSet<String>>,
    stats: Mutex<RunStats>,
    done: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: Config, gate: RelevanceGate, deps: OrchestratorDeps) -> Self {
        let knobs = Arc::new(PacingKnobs::new(config.throttle_ms, config.max_items_per_tick));
        Self {
            config,
            gate,
            frontier: Arc::new(Frontier::new()),
            expander: QueryExpander::default(),
            filter: SuggestionFilter::default(),
            knobs,
            deps,
            seeds: Mutex::new(HashSet::new()),
            blocked_hosts: Mutex::new(HashSet::new()),
            boosted_angles: Mutex::new(HashSet::new()),
            skipped_angles: Mutex::new(HashSet::new()),
            persisted_hosts: Mutex::new(HashSet::new()),
            stats: Mutex::new(RunStats::default()),
            done: AtomicU64::new(0),
        }
    }

    pub fn knobs(&self) -> Arc<PacingKnobs> {
        Arc::clone(&self.knobs)
    }

    pub fn frontier(&self) -> Arc<Frontier> {
        Arc::clone(&self.frontier)
    }

    fn collection_id(&self) -> &str {
        &self.gate.criteria().collection_id
    }

    /// Register planner seed URLs: tracked for seed-dedup and enqueued as
    /// direct fetches.
    pub fn seed(&self, urls: &[&str]) {
        let mut seeds = self.seeds.lock().expect("seeds lock");
        for url in urls {
            seeds.insert(canonical_url(url));
            self.frontier.enqueue(FrontierItem::new(
                Provider::Direct,
                Cursor::raw_url(*url),
                5,
                "seed",
            ));
        }
    }

    /// Enqueue a planner candidate (query, feed, or harvest source).
    pub fn enqueue(&self, item: FrontierItem) {
        self.frontier.enqueue(item);
    }

    /// Drain the frontier to completion (or until stopped).
    pub async fn run(&self) -> Result<RunStats> {
        self.ensure_seed_coverage();
        self.deps.bus.start_heartbeat();
        self.deps.bus.publish(ProgressEvent::State {
            phase: "discovering".to_string(),
            found: 0,
            total: self.frontier.len() as u64,
            done: 0,
            live: true,
        });

        loop {
            if self.knobs.is_stopped() {
                info!("Stop observed at tick boundary, ending run");
                break;
            }
            if self.knobs.is_paused() {
                tokio::time::sleep(std::time::Duration::from_millis(PAUSE_POLL_MS)).await;
                continue;
            }

            // A dead persistence collaborator is a configuration-level
            // failure: pause the run and surface it, unlike any per-item error.
            if !self.deps.sink.healthy().await {
                self.knobs.pause();
                self.deps.bus.publish(ProgressEvent::Error {
                    message: "persistence collaborator unreachable, run paused".to_string(),
                });
                self.deps.bus.stop_heartbeat();
                anyhow::bail!("persistence collaborator unreachable");
            }

            self.apply_pending_controls();

            let batch: Vec<FrontierItem> = (0..self.knobs.max_items_per_tick())
                .map_while(|_| self.frontier.dequeue())
                .collect();
            if batch.is_empty() {
                if self.frontier.is_empty() {
                    break;
                }
                continue;
            }

            stream::iter(batch)
                .for_each_concurrent(self.config.worker_count.max(1), |item| async move {
                    self.process_item(item).await;
                })
                .await;

            self.deps.bus.publish(ProgressEvent::Progress {
                done: self.done.load(Ordering::SeqCst),
                total: self.done.load(Ordering::SeqCst) + self.frontier.len() as u64,
            });

            tokio::time::sleep(std::time::Duration::from_millis(self.knobs.throttle_ms())).await;
        }

        self.finish()
    }

    /// When planner seeds are too sparse, widen with the fixed fallback list.
    fn ensure_seed_coverage(&self) {
        let seed_hosts: HashSet<String> = self
            .seeds
            .lock()
            .expect("seeds lock")
            .iter()
            .map(|u| host_of(u))
            .filter(|h| !h.is_empty())
            .collect();
        if seed_hosts.len() >= self.config.min_unique_domains {
            return;
        }
        warn!(
            seed_hosts = seed_hosts.len(),
            minimum = self.config.min_unique_domains,
            "Sparse planner seeds, adding fallback seed domains"
        );
        let fallback: Vec<String> = self
            .config
            .fallback_seed_domains
            .iter()
            .map(|d| format!("https://{d}"))
            .collect();
        self.seed(&fallback.iter().map(String::as_str).collect::<Vec<_>>());
    }

    fn finish(&self) -> Result<RunStats> {
        self.deps.bus.stop_heartbeat();
        let done = self.done.load(Ordering::SeqCst);
        self.deps.bus.publish(ProgressEvent::Complete { done });

        let mut stats = std::mem::take(&mut *self.stats.lock().expect("stats lock"));
        let unique_domains = self.persisted_hosts.lock().expect("hosts lock").len();
        stats.unique_domains_persisted = unique_domains as u32;

        if unique_domains < self.config.min_unique_domains && stats.counters.persist_ok > 0 {
            warn!(
                unique_domains,
                minimum = self.config.min_unique_domains,
                "Run persisted below the hard unique-domain minimum"
            );
        } else if unique_domains < self.config.warn_unique_domains {
            info!(
                unique_domains,
                warn_threshold = self.config.warn_unique_domains,
                "Run persisted below the unique-domain warning threshold"
            );
        }

        info!("Discovery run complete. {stats}");
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    fn apply_pending_controls(&self) {
        for request in self
            .deps
            .controls
            .drain_pending(self.collection_id())
        {
            info!(action = ?request.action, "Applying operator action");
            match request.action {
                ControlAction::PinSeed { url } => {
                    self.seeds.lock().expect("seeds lock").insert(canonical_url(&url));
                    self.frontier.enqueue(FrontierItem::new(
                        Provider::Direct,
                        Cursor::raw_url(url),
                        PIN_PRIORITY,
                        "pinned",
                    ));
                }
                ControlAction::AddSeed { url } => {
                    self.seeds.lock().expect("seeds lock").insert(canonical_url(&url));
                    self.frontier.enqueue(FrontierItem::new(
                        Provider::Direct,
                        Cursor::raw_url(url),
                        5,
                        "seed",
                    ));
                }
                ControlAction::BlockHost { host } => {
                    self.blocked_hosts
                        .lock()
                        .expect("blocked lock")
                        .insert(host.to_lowercase());
                }
                ControlAction::BoostAngle { angle } => {
                    self.boosted_angles.lock().expect("angles lock").insert(angle);
                }
                ControlAction::SkipAngle { angle } => {
                    self.skipped_angles.lock().expect("angles lock").insert(angle);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-item processing
    // -----------------------------------------------------------------------

    /// Worker boundary: everything below returns into this function, and any
    /// error becomes an `error` audit step plus a skipped decision — never a
    /// crashed worker.
    async fn process_item(&self, item: FrontierItem) {
        let trail_id = self
            .deps
            .recorder
            .start_trail(self.collection_id(), Some(item.id));

        let outcome = self.process_inner(trail_id, &item).await;
        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.counters.processed += 1;
        }
        self.done.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = outcome {
            warn!(item_id = %item.id, error = %e, "Item failed at worker boundary");
            self.deps.recorder.add_step(
                trail_id,
                AuditStepType::Error,
                json!({ "error": e.to_string() }),
                None,
            );
            self.deps
                .recorder
                .complete_trail(trail_id, Decision::Skipped, Some("error"), None);
            self.stats.lock().expect("stats lock").counters.skipped += 1;
            self.deps.bus.publish(ProgressEvent::Error {
                message: e.to_string(),
            });
        }
    }

    async fn process_inner(&self, trail_id: Uuid, item: &FrontierItem) -> Result<()> {
        if self
            .skipped_angles
            .lock()
            .expect("angles lock")
            .contains(&item.angle)
        {
            self.skip(trail_id, "angle_skipped", None);
            return Ok(());
        }

        match (&item.cursor, item.provider) {
            (Cursor::RawUrl { url }, Provider::Feed) => {
                self.handle_feed(trail_id, item, url).await
            }
            (Cursor::RawUrl { url }, Provider::Encyclopedia) => {
                self.handle_reference_harvest(trail_id, item, url).await
            }
            (Cursor::RawUrl { url }, _) => self.handle_url(trail_id, item, url).await,
            (Cursor::Keywords { .. } | Cursor::PageTitle { .. }, _) => {
                self.handle_query(trail_id, item).await
            }
        }
    }

    /// Expand a query candidate and enqueue the surviving suggestions.
    async fn handle_query(&self, trail_id: Uuid, item: &FrontierItem) -> Result<()> {
        // attempt is prior tries: first processing of an item is attempt 0.
        let attempt = item.attempt.saturating_sub(1);
        let expansion = self
            .expander
            .expand(item, attempt, self.frontier.total_dequeues());

        if expansion.deferred_general {
            self.stats.lock().expect("stats lock").general_deferred += 1;
        }

        if expansion.suggestions.is_empty() {
            if expansion.deferred_general && item.attempt < MAX_ITEM_ATTEMPTS {
                // Targeted queries exhausted, general still locked — try
                // again later at lower priority.
                self.requeue(trail_id, item, "general_deferred");
            } else {
                self.skip(trail_id, "no_suggestions", None);
            }
            return Ok(());
        }

        let enqueued = self
            .filter_and_enqueue(trail_id, item, expansion.suggestions)
            .await?;
        self.deps.recorder.complete_trail(
            trail_id,
            Decision::Skipped,
            Some(&format!("expanded:{enqueued}")),
            None,
        );
        Ok(())
    }

    /// Poll a feed source and enqueue fresh entries.
    async fn handle_feed(&self, trail_id: Uuid, item: &FrontierItem, url: &str) -> Result<()> {
        let entries = match self.deps.feeds.fetch_entries(url).await {
            Ok(entries) => entries,
            Err(e) => {
                // Feed errors are transient by default: the endpoint exists,
                // the network hiccuped.
                self.deps.recorder.add_step(
                    trail_id,
                    AuditStepType::Fetch,
                    json!({ "url": url, "error": e.to_string() }),
                    None,
                );
                if item.attempt < MAX_ITEM_ATTEMPTS {
                    self.requeue(trail_id, item, "feed_error");
                } else {
                    self.skip(trail_id, "feed_error", None);
                }
                return Ok(());
            }
        };

        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Fetch,
            json!({ "url": url, "entries": entries.len() }),
            None,
        );
        self.stats.lock().expect("stats lock").feed_items_found += entries.len() as u32;

        let suggestions = crate::feeds::suggestions_from_entries(item, &entries);
        let enqueued = self.filter_and_enqueue(trail_id, item, suggestions).await?;
        self.deps.recorder.complete_trail(
            trail_id,
            Decision::Skipped,
            Some(&format!("expanded:{enqueued}")),
            None,
        );
        Ok(())
    }

    /// Fetch a structured knowledge page and enqueue its off-site references.
    async fn handle_reference_harvest(
        &self,
        trail_id: Uuid,
        item: &FrontierItem,
        url: &str,
    ) -> Result<()> {
        let result = self.deps.fetcher.fetch(url).await;
        self.record_fetch(trail_id, url, &result);
        if !result.ok {
            self.finish_failed_fetch(trail_id, item, &result);
            return Ok(());
        }

        let suggestions = self
            .expander
            .harvest_references(item, &result.body, &result.final_url);
        self.stats.lock().expect("stats lock").reference_links_harvested +=
            suggestions.len() as u32;

        let enqueued = self.filter_and_enqueue(trail_id, item, suggestions).await?;
        self.deps.recorder.complete_trail(
            trail_id,
            Decision::Skipped,
            Some(&format!("harvested:{enqueued}")),
            None,
        );
        Ok(())
    }

    /// Run suggestions through the dedup/cooldown filter and enqueue the
    /// accepted ones as direct fetches. Returns how many were enqueued.
    async fn filter_and_enqueue(
        &self,
        trail_id: Uuid,
        item: &FrontierItem,
        suggestions: Vec<QuerySuggestion>,
    ) -> Result<usize> {
        let generated = suggestions.len();
        let seeds = self.seeds.lock().expect("seeds lock").clone();
        let outcome = self
            .filter
            .filter(
                suggestions,
                &seeds,
                self.deps.seen.as_ref(),
                self.deps.cooldowns.as_ref(),
                Utc::now(),
            )
            .await
            .context("suggestion filter failed")?;

        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.suggestions_generated += generated as u32;
            stats.suggestions_accepted += outcome.accepted.len() as u32;
            stats.suggestions_skipped += outcome.skipped.len() as u32;
        }

        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Dedup,
            json!({
                "generated": generated,
                "accepted": outcome.accepted.len(),
                "skipped": outcome
                    .skipped
                    .iter()
                    .map(|(s, reason)| json!({ "url": s.url, "reason": reason.to_string() }))
                    .collect::<Vec<_>>(),
            }),
            None,
        );

        if !outcome.accepted.is_empty() {
            self.deps.bus.publish(ProgressEvent::Found {
                count: outcome.accepted.len() as u64,
            });
        }

        let boosted = self
            .boosted_angles
            .lock()
            .expect("angles lock")
            .contains(&item.angle);
        let priority = item.priority + if boosted { ANGLE_BOOST } else { 0 };
        let enqueued = outcome.accepted.len();
        for suggestion in outcome.accepted {
            self.frontier.enqueue(
                FrontierItem::new(
                    Provider::Direct,
                    Cursor::raw_url(suggestion.url),
                    priority,
                    &suggestion.angle,
                )
                .with_meta(item.meta.clone()),
            );
        }
        // Suppress accepted-host cooldown noise in logs, but keep skip detail.
        for (suggestion, reason) in &outcome.skipped {
            if !matches!(reason, SkipReason::Cooldown { .. }) {
                info!(url = suggestion.url.as_str(), reason = %reason, "Suggestion skipped");
            }
        }
        Ok(enqueued)
    }

    /// The full fetch → extract → canonicalize → dedup → gate → persist chain
    /// for one concrete URL.
    async fn handle_url(&self, trail_id: Uuid, item: &FrontierItem, url: &str) -> Result<()> {
        let host = host_of(url);
        if self
            .blocked_hosts
            .lock()
            .expect("blocked lock")
            .contains(&host)
        {
            self.skip(trail_id, "host_blocked", None);
            return Ok(());
        }

        // --- fetch ---
        let result = self.deps.fetcher.fetch(url).await;
        self.record_fetch(trail_id, url, &result);
        if !result.ok {
            self.finish_failed_fetch(trail_id, item, &result);
            return Ok(());
        }

        if extractor::looks_paywalled(&result.body) {
            self.stats.lock().expect("stats lock").counters.paywall_blocked += 1;
            self.skip(trail_id, "paywall", None);
            return Ok(());
        }

        // --- extract ---
        let started = std::time::Instant::now();
        let doc = match extractor::extract(&result.body, &result.final_url) {
            Ok(doc) => doc,
            Err(_) => {
                self.deps.recorder.add_step(
                    trail_id,
                    AuditStepType::Extract,
                    json!({ "error": "no_extractable_text" }),
                    Some(started.elapsed().as_millis() as u64),
                );
                self.skip(trail_id, "extract_empty", None);
                return Ok(());
            }
        };
        let text_bytes = doc.text.len();
        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Extract,
            json!({
                "title": doc.title,
                "text_bytes": text_bytes,
                "partial": text_bytes < self.config.min_text_bytes_full,
                "quotes": doc.quotes.len(),
            }),
            Some(started.elapsed().as_millis() as u64),
        );
        if text_bytes < self.config.min_text_bytes_partial {
            self.skip(trail_id, &format!("extract_too_small:{text_bytes}"), None);
            return Ok(());
        }
        self.stats.lock().expect("stats lock").counters.extract_ok += 1;

        // --- canonicalize + dedup ---
        let canonical = canonical_url(&result.final_url);
        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Canonicalize,
            json!({ "canonical_url": canonical }),
            None,
        );
        if self.deps.seen.is_seen(&canonical).await? {
            self.deps.recorder.add_step(
                trail_id,
                AuditStepType::Dedup,
                json!({ "duplicate": true, "canonical_url": canonical }),
                None,
            );
            self.stats.lock().expect("stats lock").counters.duplicates += 1;
            self.skip(trail_id, "already_seen", None);
            return Ok(());
        }
        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Dedup,
            json!({ "duplicate": false }),
            None,
        );

        // --- relevance ---
        let verdict = self.gate.evaluate(&doc);
        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Relevance,
            json!({
                "score": verdict.score,
                "threshold": self.gate.criteria().min_score,
                "pass": verdict.pass,
            }),
            None,
        );
        if !verdict.pass {
            self.stats.lock().expect("stats lock").counters.relevance_fail += 1;
            self.skip(
                trail_id,
                &format!("relevance_fail:{:.2}", verdict.score),
                Some(verdict.score),
            );
            return Ok(());
        }

        // --- oracle (never fatal) ---
        let (judgment, degraded) = judge_with_fallback(
            self.deps.oracle.as_ref(),
            &doc.text,
            &self.gate.criteria().topic_terms.join(", "),
        )
        .await;
        if degraded {
            self.deps.recorder.mark_degraded(trail_id);
            self.stats.lock().expect("stats lock").oracle_degraded += 1;
        }

        // --- persist ---
        let request = PersistRequest {
            collection_id: self.collection_id().to_string(),
            canonical_url: canonical.clone(),
            document: doc.clone(),
            judgment: Some(judgment),
            score: verdict.score,
        };
        let started = std::time::Instant::now();
        match self.deps.sink.persist(&request).await {
            Ok(PersistOutcome::Persisted) => {
                self.deps.recorder.add_step(
                    trail_id,
                    AuditStepType::Persist,
                    json!({ "canonical_url": canonical, "outcome": "persisted" }),
                    Some(started.elapsed().as_millis() as u64),
                );
                self.deps.seen.mark_seen(&canonical).await?;
                {
                    let mut stats = self.stats.lock().expect("stats lock");
                    stats.counters.persist_ok += 1;
                }
                self.persisted_hosts
                    .lock()
                    .expect("hosts lock")
                    .insert(host_of(&canonical));
                self.deps.bus.publish(ProgressEvent::ItemReady {
                    url: canonical,
                    title: doc.title.clone(),
                    score: verdict.score,
                });
                self.deps.recorder.complete_trail(
                    trail_id,
                    Decision::Saved,
                    None,
                    Some(verdict.score),
                );
            }
            Ok(PersistOutcome::AlreadyExists) => {
                // Canonical collision in the durable store — counted, not an error.
                self.deps.recorder.add_step(
                    trail_id,
                    AuditStepType::Persist,
                    json!({ "canonical_url": canonical, "outcome": "already_exists" }),
                    Some(started.elapsed().as_millis() as u64),
                );
                self.deps.seen.mark_seen(&canonical).await?;
                self.stats.lock().expect("stats lock").counters.duplicates += 1;
                self.skip(trail_id, "duplicate_canonical", Some(verdict.score));
            }
            Err(e) => return Err(e).context("persist failed"),
        }
        Ok(())
    }

    fn record_fetch(&self, trail_id: Uuid, url: &str, result: &FetchResult) {
        self.deps.recorder.add_step(
            trail_id,
            AuditStepType::Fetch,
            json!({
                "url": url,
                "final_url": result.final_url,
                "status": result.status,
                "content_type": result.content_type,
                "ok": result.ok,
                "error": result.error,
            }),
            Some(result.ms),
        );
    }

    /// Decide what a failed fetch means for the item: policy failures are
    /// terminal, transient ones earn a requeue until the attempt budget runs
    /// out.
    fn finish_failed_fetch(&self, trail_id: Uuid, item: &FrontierItem, result: &FetchResult) {
        let error = result.error.as_deref().unwrap_or("fetch_failed");
        let policy_failure = matches!(error, ERR_ROBOTS | ERR_CONTENT_TYPE)
            || matches!(result.status, Some(status) if (400..500).contains(&status) && status != 429);

        if policy_failure || item.attempt >= MAX_ITEM_ATTEMPTS {
            self.skip(trail_id, error, None);
        } else {
            self.requeue(trail_id, item, error);
        }
    }

    fn skip(&self, trail_id: Uuid, reason: &str, final_score: Option<f64>) {
        self.stats.lock().expect("stats lock").counters.skipped += 1;
        self.deps
            .recorder
            .complete_trail(trail_id, Decision::Skipped, Some(reason), final_score);
    }

    fn requeue(&self, trail_id: Uuid, item: &FrontierItem, reason: &str) {
        self.stats.lock().expect("stats lock").items_requeued += 1;
        self.frontier.requeue(item.clone());
        self.deps.recorder.complete_trail(
            trail_id,
            Decision::Skipped,
            Some(&format!("requeued:{reason}")),
            None,
        );
    }
}
