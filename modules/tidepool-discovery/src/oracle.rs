//! Scoring oracle seam.
//!
//! The oracle (LLM- or rules-backed) is consumed as a black box. Its output
//! shape is validated here, and a local heuristic stands in whenever the
//! oracle is unavailable or returns junk — the pipeline's correctness never
//! depends on the oracle, only its quality improves with it.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use tidepool_common::OracleJudgment;

/// A summary shorter than this is not a summary.
const MIN_SUMMARY_CHARS: usize = 40;
/// Judgments must carry at least this many key facts.
const MIN_KEY_FACTS: usize = 2;

/// Boilerplate fragments that mark a degenerate oracle response.
const BOILERPLATE_FRAGMENTS: &[&str] = &[
    "as an ai",
    "i cannot",
    "lorem ipsum",
    "[insert",
    "todo:",
];

#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Judge extracted text in the context of the collection's topic.
    async fn judge(&self, text: &str, context: &str) -> Result<OracleJudgment>;

    fn name(&self) -> &str;
}

/// Validate an oracle response's shape. Returns the reason it is unusable,
/// or `None` when it passes.
pub fn validate_judgment(judgment: &OracleJudgment) -> Option<String> {
    let summary = judgment.summary.trim();
    if summary.len() < MIN_SUMMARY_CHARS {
        return Some(format!("summary too short ({} chars)", summary.len()));
    }
    if summary.ends_with("...") || summary.ends_with('…') {
        return Some("summary appears truncated".to_string());
    }
    if judgment.key_facts.len() < MIN_KEY_FACTS {
        return Some(format!("too few key facts ({})", judgment.key_facts.len()));
    }
    let lowered = summary.to_lowercase();
    for fragment in BOILERPLATE_FRAGMENTS {
        if lowered.contains(fragment) {
            return Some(format!("boilerplate fragment: {fragment}"));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// HeuristicOracle — the required local fallback
// ---------------------------------------------------------------------------

/// Sentence-extraction fallback: the lead sentences become the summary,
/// number- and entity-bearing sentences become key facts, and frequent
/// non-stopword terms become tags.
pub struct HeuristicOracle;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "of", "to", "in", "on", "for", "with", "at", "by",
    "from", "that", "this", "is", "was", "are", "were", "be", "been", "it", "its", "as", "has",
    "have", "had", "will", "would", "said",
];

#[async_trait]
impl ScoringOracle for HeuristicOracle {
    async fn judge(&self, text: &str, _context: &str) -> Result<OracleJudgment> {
        let sentences: Vec<&str> = text
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| s.split_whitespace().count() >= 6)
            .collect();

        let summary = sentences
            .iter()
            .take(3)
            .map(|s| format!("{s}."))
            .collect::<Vec<_>>()
            .join(" ");

        let key_facts: Vec<String> = sentences
            .iter()
            .filter(|s| {
                let has_number = s.chars().any(|c| c.is_ascii_digit());
                let entity_like = s
                    .split_whitespace()
                    .skip(1)
                    .filter(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
                    .count()
                    >= 2;
                has_number || entity_like
            })
            .take(5)
            .map(|s| format!("{s}."))
            .collect();

        let mut frequencies: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        for word in text.split_whitespace() {
            let cleaned: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if cleaned.len() >= 4 && !STOPWORDS.contains(&cleaned.as_str()) {
                *frequencies.entry(cleaned).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let tags: Vec<String> = ranked.into_iter().take(6).map(|(w, _)| w).collect();

        Ok(OracleJudgment {
            summary,
            key_facts,
            tags,
        })
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Ask the oracle, validate its shape, and fall back to the local heuristic
/// on failure or invalid output. Returns the judgment and whether the run
/// degraded to the heuristic.
pub async fn judge_with_fallback(
    oracle: &dyn ScoringOracle,
    text: &str,
    context: &str,
) -> (OracleJudgment, bool) {
    match oracle.judge(text, context).await {
        Ok(judgment) => match validate_judgment(&judgment) {
            None => (judgment, false),
            Some(reason) => {
                warn!(oracle = oracle.name(), reason, "Oracle output failed validation, degrading to heuristic");
                (fallback_judgment(text, context).await, true)
            }
        },
        Err(e) => {
            warn!(oracle = oracle.name(), error = %e, "Oracle unavailable, degrading to heuristic");
            (fallback_judgment(text, context).await, true)
        }
    }
}

async fn fallback_judgment(text: &str, context: &str) -> OracleJudgment {
    HeuristicOracle
        .judge(text, context)
        .await
        .unwrap_or_else(|_| OracleJudgment {
            summary: String::new(),
            key_facts: Vec::new(),
            tags: Vec::new(),
        })
}
