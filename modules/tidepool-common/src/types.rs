use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Providers ---

/// Which engine family a frontier item is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// General web search engines.
    WebSearch,
    /// News-specific search with date-range support.
    NewsSearch,
    /// RSS/Atom feed polling.
    Feed,
    /// Structured knowledge source — triggers reference harvest instead of
    /// query synthesis.
    Encyclopedia,
    /// A concrete URL to fetch directly, no expansion.
    Direct,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::WebSearch => write!(f, "web_search"),
            Provider::NewsSearch => write!(f, "news_search"),
            Provider::Feed => write!(f, "feed"),
            Provider::Encyclopedia => write!(f, "encyclopedia"),
            Provider::Direct => write!(f, "direct"),
        }
    }
}

// --- Frontier ---

/// The payload of a frontier item, decoded once at the frontier boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    Keywords {
        keywords: Vec<String>,
        #[serde(default)]
        site_filters: Vec<String>,
    },
    RawUrl {
        url: String,
    },
    PageTitle {
        title: String,
    },
}

impl Cursor {
    pub fn keywords(keywords: &[&str]) -> Self {
        Cursor::Keywords {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            site_filters: Vec::new(),
        }
    }

    pub fn raw_url(url: impl Into<String>) -> Self {
        Cursor::RawUrl { url: url.into() }
    }
}

/// Planner hints attached to a frontier item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMeta {
    /// When present, every generated search URL must embed an equivalent
    /// freshness filter.
    #[serde(default)]
    pub min_pub_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_controversy: bool,
    #[serde(default)]
    pub is_history: bool,
}

/// A unit of pending discovery work: a seed URL or a query candidate.
///
/// Identity is `id`; URL/query uniqueness is the dedup layer's job, not the
/// item's. Consumed on dequeue, re-enqueued with backoff on transient failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierItem {
    pub id: Uuid,
    pub provider: Provider,
    pub cursor: Cursor,
    pub priority: i32,
    /// Planner angle label, e.g. "origins", "controversy", "recent_coverage".
    pub angle: String,
    #[serde(default)]
    pub meta: ItemMeta,
    /// How many times this item has been dequeued (incl. the current attempt).
    #[serde(default)]
    pub attempt: u32,
}

impl FrontierItem {
    pub fn new(provider: Provider, cursor: Cursor, priority: i32, angle: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            cursor,
            priority,
            angle: angle.to_string(),
            meta: ItemMeta::default(),
            attempt: 0,
        }
    }

    pub fn with_meta(mut self, meta: ItemMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// A concrete search/fetch URL produced by the expander. Ephemeral — consumed
/// by the suggestion filter, persisted only inside audit step data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySuggestion {
    pub url: String,
    pub host: String,
    pub angle: String,
    pub generated_from: Uuid,
}

// --- Extraction ---

/// Readable-text representation of a fetched page. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub title: String,
    pub text: String,
    pub byline: Option<String>,
    pub site_name: Option<String>,
    pub published_time: Option<DateTime<Utc>>,
    /// Up to two fair-use representative quotes, ≤180 words combined.
    pub quotes: Vec<String>,
}

// --- Audit ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStepType {
    Fetch,
    Canonicalize,
    Dedup,
    Relevance,
    Extract,
    Persist,
    Error,
}

impl std::fmt::Display for AuditStepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditStepType::Fetch => write!(f, "fetch"),
            AuditStepType::Canonicalize => write!(f, "canonicalize"),
            AuditStepType::Dedup => write!(f, "dedup"),
            AuditStepType::Relevance => write!(f, "relevance"),
            AuditStepType::Extract => write!(f, "extract"),
            AuditStepType::Persist => write!(f, "persist"),
            AuditStepType::Error => write!(f, "error"),
        }
    }
}

/// One recorded action within a trail. Append-only, ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStep {
    pub timestamp: DateTime<Utc>,
    pub step_type: AuditStepType,
    pub data: serde_json::Value,
    pub duration_ms: Option<u64>,
}

/// Terminal outcome of processing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Saved,
    Skipped,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Saved => write!(f, "saved"),
            Decision::Skipped => write!(f, "skipped"),
        }
    }
}

/// The full audit record of one candidate's journey from dequeue to terminal
/// decision. `decision` is set exactly once; the closed trail is the unit of
/// replay and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub id: Uuid,
    pub collection_id: String,
    pub item_id: Option<Uuid>,
    pub steps: Vec<AuditStep>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub decision: Option<Decision>,
    pub reason: Option<String>,
    pub final_score: Option<f64>,
    /// Set when the scoring oracle was unavailable and the local heuristic
    /// stood in — lets degraded runs be distinguished in aggregate stats.
    #[serde(default)]
    pub degraded: bool,
}

impl AuditTrail {
    pub fn is_closed(&self) -> bool {
        self.decision.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

// --- Telemetry ---

/// Per-run monotonic counters, additively aggregable across runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub processed: u64,
    pub duplicates: u64,
    pub paywall_blocked: u64,
    pub extract_ok: u64,
    pub relevance_fail: u64,
    pub persist_ok: u64,
    pub skipped: u64,
}

impl TelemetryCounters {
    /// Fold another run's counters into this one.
    pub fn merge(&mut self, other: &TelemetryCounters) {
        self.processed += other.processed;
        self.duplicates += other.duplicates;
        self.paywall_blocked += other.paywall_blocked;
        self.extract_ok += other.extract_ok;
        self.relevance_fail += other.relevance_fail;
        self.persist_ok += other.persist_ok;
        self.skipped += other.skipped;
    }
}

// --- Citation audit ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    Failed,
}

/// The stored fields of a previously-decided citation that the backward
/// audit reads. Only `Decision::Skipped` records are ever audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCitation {
    pub url: String,
    pub decision: Decision,
    pub verification_status: VerificationStatus,
    /// External relevance score (0–100) recorded at scan time.
    pub ai_priority_score: Option<u32>,
    pub content_text: Option<String>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub denied_at: Option<DateTime<Utc>>,
    /// Host of the collection's own primary source, if any — a verified URL
    /// on a different domain is an independent-evidence signal.
    pub source_domain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessPriority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ReprocessPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReprocessPriority::High => write!(f, "high"),
            ReprocessPriority::Medium => write!(f, "medium"),
            ReprocessPriority::Low => write!(f, "low"),
        }
    }
}

/// Derived verdict on whether a denied citation looks internally inconsistent
/// enough to reprocess. Recomputed on demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationAuditResult {
    pub should_reprocess: bool,
    pub audit_score: u32,
    pub reasons: Vec<String>,
    pub priority: ReprocessPriority,
}

// --- Oracle ---

/// Structured judgment returned by the scoring oracle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OracleJudgment {
    pub summary: String,
    pub key_facts: Vec<String>,
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips_tagged() {
        let cursor = Cursor::Keywords {
            keywords: vec!["budget hearing".to_string()],
            site_filters: vec!["example.gov".to_string()],
        };
        let json = serde_json::to_value(&cursor).unwrap();
        assert_eq!(json["kind"], "keywords");
        let back: Cursor = serde_json::from_value(json).unwrap();
        match back {
            Cursor::Keywords { keywords, site_filters } => {
                assert_eq!(keywords, vec!["budget hearing"]);
                assert_eq!(site_filters, vec!["example.gov"]);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn counters_merge_additively() {
        let mut a = TelemetryCounters {
            processed: 3,
            duplicates: 1,
            ..Default::default()
        };
        let b = TelemetryCounters {
            processed: 2,
            persist_ok: 2,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.processed, 5);
        assert_eq!(a.duplicates, 1);
        assert_eq!(a.persist_ok, 2);
    }

    #[test]
    fn trail_duration_requires_close() {
        let trail = AuditTrail {
            id: Uuid::new_v4(),
            collection_id: "c1".to_string(),
            item_id: None,
            steps: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            decision: None,
            reason: None,
            final_score: None,
            degraded: false,
        };
        assert!(!trail.is_closed());
        assert!(trail.duration_ms().is_none());
    }
}
