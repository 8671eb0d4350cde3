//! Relevance gating and backward citation audit.
//!
//! The forward gate scores extracted content against the collection's
//! criteria before persistence. The backward audit re-reads previously-denied
//! records for internal inconsistency — a stale-but-correct denial stays
//! denied, an anomalous one is surfaced for reprocessing.

use chrono::Duration;

use tidepool_common::{
    host_of, CitationAuditResult, Decision, ExtractedDocument, ReprocessPriority, StoredCitation,
    VerificationStatus,
};

// --- Forward gate constants ---

/// Relevance score below this is a quality failure.
const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.35;

// --- Backward audit constants ---

/// Audit score at or above this flags the citation for reprocessing.
const REPROCESS_CUTOFF: u32 = 50;
/// Audit score at or above this is high priority.
const HIGH_PRIORITY_CUTOFF: u32 = 70;

/// External relevance score at or above this counts as "scored highly".
const EXTERNAL_SCORE_FLOOR: u32 = 60;
/// Dominant signal: high external score on a denied record, scaled by the
/// score itself up to this many points.
const WEIGHT_EXTERNAL_MAX: f64 = 60.0;
const WEIGHT_CONTENT_LARGE: f64 = 15.0;
const WEIGHT_CONTENT_MEDIUM: f64 = 8.0;
const WEIGHT_CONTENT_PRESENT: f64 = 5.0;
const WEIGHT_DENIAL_AFTER_HIGH_SCAN: f64 = 10.0;
const WEIGHT_VERIFIED_OFFSITE: f64 = 10.0;

const CONTENT_LARGE_CHARS: usize = 5000;
const CONTENT_MEDIUM_CHARS: usize = 2000;
/// A denial within this window of a high-scoring scan smells like a
/// transient bug rather than a considered decision.
const DENIAL_AFTER_SCAN_DAYS: i64 = 7;

// --- Forward gate ---

/// What a collection considers relevant.
#[derive(Debug, Clone)]
pub struct CollectionCriteria {
    pub collection_id: String,
    pub topic_terms: Vec<String>,
    pub min_score: f64,
}

impl CollectionCriteria {
    pub fn new(collection_id: &str, topic_terms: &[&str]) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            topic_terms: topic_terms.iter().map(|s| s.to_lowercase()).collect(),
            min_score: DEFAULT_RELEVANCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateVerdict {
    pub score: f64,
    pub pass: bool,
}

/// Score a document against collection criteria.
///
/// Components: term coverage (how many topic terms appear at all), title
/// presence (terms in the title weigh more than body mentions), and mention
/// density (repeat mentions up to a saturation point).
pub fn score_relevance(doc: &ExtractedDocument, criteria: &CollectionCriteria) -> f64 {
    if criteria.topic_terms.is_empty() {
        return 0.0;
    }
    let title = doc.title.to_lowercase();
    let text = doc.text.to_lowercase();
    let term_count = criteria.topic_terms.len() as f64;

    let mut matched = 0usize;
    let mut title_hits = 0usize;
    let mut occurrences = 0usize;
    for term in &criteria.topic_terms {
        let body_occurrences = text.matches(term.as_str()).count();
        let in_title = title.contains(term.as_str());
        if body_occurrences > 0 || in_title {
            matched += 1;
        }
        if in_title {
            title_hits += 1;
        }
        occurrences += body_occurrences;
    }

    let coverage = matched as f64 / term_count;
    let title_factor = title_hits as f64 / term_count;
    // Saturates at three mentions per term — repetition beyond that says
    // nothing more about relevance.
    let density = (occurrences as f64 / (term_count * 3.0)).min(1.0);

    (coverage * 0.5 + title_factor * 0.3 + density * 0.2).clamp(0.0, 1.0)
}

pub struct RelevanceGate {
    criteria: CollectionCriteria,
}

impl RelevanceGate {
    pub fn new(criteria: CollectionCriteria) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &CollectionCriteria {
        &self.criteria
    }

    pub fn evaluate(&self, doc: &ExtractedDocument) -> GateVerdict {
        let score = score_relevance(doc, &self.criteria);
        GateVerdict {
            score,
            pass: score >= self.criteria.min_score,
        }
    }
}

// --- Backward citation audit ---

/// Map an audit score to the reprocess decision and priority band.
pub fn classify_audit_score(score: u32) -> (bool, ReprocessPriority) {
    let priority = if score >= HIGH_PRIORITY_CUTOFF {
        ReprocessPriority::High
    } else if score >= REPROCESS_CUTOFF {
        ReprocessPriority::Medium
    } else {
        ReprocessPriority::Low
    };
    (score >= REPROCESS_CUTOFF, priority)
}

/// Re-audit a previously-denied citation for anomalies. Returns `None` for
/// records whose prior decision was not a denial — only denied records are
/// ever reconsidered.
pub fn audit_for_reprocessing(citation: &StoredCitation) -> Option<CitationAuditResult> {
    if citation.decision != Decision::Skipped {
        return None;
    }

    let mut score = 0.0_f64;
    let mut reasons = Vec::new();

    let external = citation.ai_priority_score.unwrap_or(0);
    let scored_highly = external >= EXTERNAL_SCORE_FLOOR;

    if scored_highly {
        let points = WEIGHT_EXTERNAL_MAX * (external.min(100) as f64 / 100.0);
        score += points;
        reasons.push(format!(
            "external relevance score {external} despite denial"
        ));
    }

    let content_len = citation.content_text.as_deref().map(str::len).unwrap_or(0);
    if content_len >= CONTENT_LARGE_CHARS {
        score += WEIGHT_CONTENT_LARGE;
        reasons.push(format!("substantial extracted content ({content_len} chars)"));
    } else if content_len >= CONTENT_MEDIUM_CHARS {
        score += WEIGHT_CONTENT_MEDIUM;
        reasons.push(format!("moderate extracted content ({content_len} chars)"));
    }
    if content_len > 0 {
        score += WEIGHT_CONTENT_PRESENT;
        reasons.push("content was extracted yet the record was denied".to_string());
    }

    if scored_highly {
        if let (Some(scanned), Some(denied)) = (citation.last_scanned_at, citation.denied_at) {
            let gap = denied - scanned;
            if gap >= Duration::zero() && gap <= Duration::days(DENIAL_AFTER_SCAN_DAYS) {
                score += WEIGHT_DENIAL_AFTER_HIGH_SCAN;
                reasons.push("denied shortly after a high-scoring scan".to_string());
            }
        }
    }

    if scored_highly && citation.verification_status == VerificationStatus::Verified {
        let url_host = host_of(&citation.url);
        let offsite = citation
            .source_domain
            .as_deref()
            .map(|d| !url_host.is_empty() && url_host != d.to_lowercase())
            .unwrap_or(false);
        if offsite {
            score += WEIGHT_VERIFIED_OFFSITE;
            reasons.push("verified off-site URL scored highly while denied".to_string());
        }
    }

    let audit_score = (score.round() as u32).min(100);
    let (should_reprocess, priority) = classify_audit_score(audit_score);

    Some(CitationAuditResult {
        should_reprocess,
        audit_score,
        reasons,
        priority,
    })
}

/// Convenience: audit a batch of stored citations, yielding only the ones
/// flagged for reprocessing, highest score first.
pub fn audit_batch(citations: &[StoredCitation]) -> Vec<(StoredCitation, CitationAuditResult)> {
    let mut flagged: Vec<(StoredCitation, CitationAuditResult)> = citations
        .iter()
        .filter_map(|c| audit_for_reprocessing(c).map(|r| (c.clone(), r)))
        .filter(|(_, r)| r.should_reprocess)
        .collect();
    flagged.sort_by(|a, b| b.1.audit_score.cmp(&a.1.audit_score));
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(title: &str, text: &str) -> ExtractedDocument {
        ExtractedDocument {
            title: title.to_string(),
            text: text.to_string(),
            byline: None,
            site_name: None,
            published_time: None,
            quotes: Vec::new(),
        }
    }

    fn denied(
        external: Option<u32>,
        content_len: usize,
        verified: bool,
    ) -> StoredCitation {
        StoredCitation {
            url: "https://tribune.example.com/story/42".to_string(),
            decision: Decision::Skipped,
            verification_status: if verified {
                VerificationStatus::Verified
            } else {
                VerificationStatus::Unverified
            },
            ai_priority_score: external,
            content_text: (content_len > 0).then(|| "x".repeat(content_len)),
            last_scanned_at: Some(Utc::now() - Duration::days(2)),
            denied_at: None,
            source_domain: Some("primary.example.org".to_string()),
        }
    }

    #[test]
    fn on_topic_document_passes() {
        let criteria = CollectionCriteria::new("c1", &["harbor", "dredging"]);
        let gate = RelevanceGate::new(criteria);
        let verdict = gate.evaluate(&doc(
            "Harbor dredging resumes",
            "The harbor dredging project resumed this week. Dredging crews expect the harbor channel work to finish by fall.",
        ));
        assert!(verdict.pass, "score: {}", verdict.score);
    }

    #[test]
    fn off_topic_document_fails() {
        let criteria = CollectionCriteria::new("c1", &["harbor", "dredging"]);
        let gate = RelevanceGate::new(criteria);
        let verdict = gate.evaluate(&doc(
            "Local bakery wins award",
            "The bakery's sourdough took first place at the county fair.",
        ));
        assert!(!verdict.pass, "score: {}", verdict.score);
    }

    #[test]
    fn empty_criteria_scores_zero() {
        let criteria = CollectionCriteria {
            collection_id: "c1".to_string(),
            topic_terms: Vec::new(),
            min_score: DEFAULT_RELEVANCE_THRESHOLD,
        };
        assert_eq!(score_relevance(&doc("t", "x"), &criteria), 0.0);
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify_audit_score(49), (false, ReprocessPriority::Low));
        assert_eq!(classify_audit_score(50), (true, ReprocessPriority::Medium));
        assert_eq!(classify_audit_score(69), (true, ReprocessPriority::Medium));
        assert_eq!(classify_audit_score(70), (true, ReprocessPriority::High));
    }

    #[test]
    fn saved_records_are_never_audited() {
        let mut citation = denied(Some(90), 6000, true);
        citation.decision = Decision::Saved;
        assert!(audit_for_reprocessing(&citation).is_none());
    }

    #[test]
    fn high_scoring_verified_denial_is_high_priority() {
        // Scenario: denied, external score 82, verified, 6000 chars of content,
        // scanned two days ago.
        let citation = denied(Some(82), 6000, true);
        let result = audit_for_reprocessing(&citation).unwrap();

        assert!(result.should_reprocess);
        assert_eq!(result.priority, ReprocessPriority::High);
        assert!(
            result.audit_score >= HIGH_PRIORITY_CUTOFF,
            "score: {}",
            result.audit_score
        );
        assert!(!result.reasons.is_empty());
    }

    #[test]
    fn low_signal_denial_stays_denied() {
        // No external score, thin content: a correct-looking denial.
        let citation = denied(None, 500, false);
        let result = audit_for_reprocessing(&citation).unwrap();
        assert!(!result.should_reprocess);
        assert_eq!(result.priority, ReprocessPriority::Low);
    }

    #[test]
    fn content_tiers_are_ordered() {
        let large = audit_for_reprocessing(&denied(None, 6000, false)).unwrap();
        let medium = audit_for_reprocessing(&denied(None, 2500, false)).unwrap();
        let tiny = audit_for_reprocessing(&denied(None, 100, false)).unwrap();
        assert!(large.audit_score > medium.audit_score);
        assert!(medium.audit_score > tiny.audit_score);
    }

    #[test]
    fn denial_shortly_after_high_scan_adds_signal() {
        let mut quick = denied(Some(75), 0, false);
        quick.denied_at = Some(Utc::now() - Duration::days(1));

        let mut slow = denied(Some(75), 0, false);
        slow.denied_at = Some(Utc::now() + Duration::days(30));

        let quick_score = audit_for_reprocessing(&quick).unwrap().audit_score;
        let slow_score = audit_for_reprocessing(&slow).unwrap().audit_score;
        assert!(
            quick_score > slow_score,
            "quick {quick_score} vs slow {slow_score}"
        );
    }

    #[test]
    fn should_reprocess_tracks_cutoff_exactly() {
        for citation in [
            denied(Some(60), 0, false),
            denied(Some(82), 6000, true),
            denied(None, 2500, false),
        ] {
            let result = audit_for_reprocessing(&citation).unwrap();
            assert_eq!(
                result.should_reprocess,
                result.audit_score >= REPROCESS_CUTOFF,
                "inconsistent verdict at {}",
                result.audit_score
            );
        }
    }

    #[test]
    fn audit_batch_sorts_flagged_by_score() {
        let citations = vec![
            denied(Some(62), 2500, false),
            denied(Some(95), 6000, true),
            denied(None, 100, false),
        ];
        let flagged = audit_batch(&citations);
        assert_eq!(flagged.len(), 2, "the weak denial is not flagged");
        assert!(flagged[0].1.audit_score >= flagged[1].1.audit_score);
    }
}
