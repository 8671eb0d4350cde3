//! Audit trail recorder — the replayable record of every decision.
//!
//! One trail per candidate, opened at dequeue and closed exactly once with a
//! terminal decision. Steps append in processing order. Aggregated stats
//! feed operational dashboards and regression detection; the paged query
//! surface serves the audit UI.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use tidepool_common::{AuditStep, AuditStepType, AuditTrail, Decision};

/// How many rejection reasons `get_stats` surfaces.
const TOP_REASONS: usize = 5;

#[derive(Default)]
struct RecorderInner {
    trails: Vec<AuditTrail>,
    index: HashMap<Uuid, usize>,
}

#[derive(Default)]
pub struct AuditRecorder {
    inner: Mutex<RecorderInner>,
}

/// One page of trails for a collection.
#[derive(Debug)]
pub struct TrailPage {
    pub items: Vec<AuditTrail>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Aggregates over a collection's closed and open trails.
#[derive(Debug, Default)]
pub struct AuditStats {
    pub total: u64,
    pub saved: u64,
    pub skipped: u64,
    pub mean_duration_ms: f64,
    /// Most frequent rejection reasons, descending.
    pub top_reasons: Vec<(String, u64)>,
    /// Mean recorded duration per step type.
    pub mean_step_ms: HashMap<AuditStepType, f64>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a trail for one candidate. Each worker context opens its own
    /// trail; trails are never shared across items.
    pub fn start_trail(&self, collection_id: &str, item_id: Option<Uuid>) -> Uuid {
        let trail = AuditTrail {
            id: Uuid::new_v4(),
            collection_id: collection_id.to_string(),
            item_id,
            steps: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            decision: None,
            reason: None,
            final_score: None,
            degraded: false,
        };
        let id = trail.id;
        let mut inner = self.inner.lock().expect("audit lock");
        let position = inner.trails.len();
        inner.trails.push(trail);
        inner.index.insert(id, position);
        id
    }

    /// Append a step. Steps on a closed or unknown trail are dropped with a
    /// warning rather than panicking a worker.
    pub fn add_step(
        &self,
        trail_id: Uuid,
        step_type: AuditStepType,
        data: Value,
        duration_ms: Option<u64>,
    ) {
        let mut inner = self.inner.lock().expect("audit lock");
        let Some(&position) = inner.index.get(&trail_id) else {
            warn!(%trail_id, "Step for unknown trail dropped");
            return;
        };
        let trail = &mut inner.trails[position];
        if trail.is_closed() {
            warn!(%trail_id, step = %step_type, "Step after trail close dropped");
            return;
        }
        trail.steps.push(AuditStep {
            timestamp: Utc::now(),
            step_type,
            data,
            duration_ms,
        });
    }

    /// Tag a trail as oracle-degraded.
    pub fn mark_degraded(&self, trail_id: Uuid) {
        let mut inner = self.inner.lock().expect("audit lock");
        if let Some(&position) = inner.index.get(&trail_id) {
            inner.trails[position].degraded = true;
        }
    }

    /// Close a trail with its terminal decision. The first completion wins;
    /// a second call is a no-op and returns false.
    pub fn complete_trail(
        &self,
        trail_id: Uuid,
        decision: Decision,
        reason: Option<&str>,
        final_score: Option<f64>,
    ) -> bool {
        let mut inner = self.inner.lock().expect("audit lock");
        let Some(&position) = inner.index.get(&trail_id) else {
            warn!(%trail_id, "Completion for unknown trail ignored");
            return false;
        };
        let trail = &mut inner.trails[position];
        if trail.is_closed() {
            warn!(%trail_id, "Trail already closed, completion ignored");
            return false;
        }
        trail.end_time = Some(Utc::now());
        trail.decision = Some(decision);
        trail.reason = reason.map(str::to_string);
        trail.final_score = final_score;
        true
    }

    pub fn get_trail(&self, trail_id: Uuid) -> Option<AuditTrail> {
        let inner = self.inner.lock().expect("audit lock");
        inner
            .index
            .get(&trail_id)
            .map(|&position| inner.trails[position].clone())
    }

    /// Paged retrieval of a collection's trails in creation order. The cursor
    /// is an opaque offset; `has_more` is computed by looking one past the
    /// requested page.
    pub fn trails(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> TrailPage {
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let inner = self.inner.lock().expect("audit lock");

        let matching: Vec<&AuditTrail> = inner
            .trails
            .iter()
            .filter(|t| t.collection_id == collection_id)
            .collect();

        let items: Vec<AuditTrail> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|t| (*t).clone())
            .collect();
        let has_more = matching.len() > offset + items.len();

        TrailPage {
            cursor: has_more.then(|| (offset + items.len()).to_string()),
            has_more,
            items,
        }
    }

    pub fn get_stats(&self, collection_id: &str) -> AuditStats {
        let inner = self.inner.lock().expect("audit lock");
        let mut stats = AuditStats::default();

        let mut duration_sum = 0i64;
        let mut duration_count = 0u64;
        let mut reason_counts: HashMap<String, u64> = HashMap::new();
        let mut step_sums: HashMap<AuditStepType, (u64, u64)> = HashMap::new();

        for trail in inner.trails.iter().filter(|t| t.collection_id == collection_id) {
            stats.total += 1;
            match trail.decision {
                Some(Decision::Saved) => stats.saved += 1,
                Some(Decision::Skipped) => stats.skipped += 1,
                None => {}
            }
            if let Some(ms) = trail.duration_ms() {
                duration_sum += ms;
                duration_count += 1;
            }
            if let (Some(Decision::Skipped), Some(reason)) = (trail.decision, &trail.reason) {
                // Parameterized reasons (cooldown:<ms>) aggregate under their prefix.
                let key = reason.split(':').next().unwrap_or(reason).to_string();
                *reason_counts.entry(key).or_insert(0) += 1;
            }
            for step in &trail.steps {
                if let Some(ms) = step.duration_ms {
                    let entry = step_sums.entry(step.step_type).or_insert((0, 0));
                    entry.0 += ms;
                    entry.1 += 1;
                }
            }
        }

        if duration_count > 0 {
            stats.mean_duration_ms = duration_sum as f64 / duration_count as f64;
        }

        let mut reasons: Vec<(String, u64)> = reason_counts.into_iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        reasons.truncate(TOP_REASONS);
        stats.top_reasons = reasons;

        stats.mean_step_ms = step_sums
            .into_iter()
            .map(|(step_type, (sum, count))| (step_type, sum as f64 / count as f64))
            .collect();

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trail_lifecycle_records_steps_in_order() {
        let recorder = AuditRecorder::new();
        let trail_id = recorder.start_trail("c1", None);

        recorder.add_step(trail_id, AuditStepType::Fetch, json!({"url": "u"}), Some(120));
        recorder.add_step(trail_id, AuditStepType::Extract, json!({}), Some(30));
        assert!(recorder.complete_trail(trail_id, Decision::Saved, None, Some(0.8)));

        let trail = recorder.get_trail(trail_id).unwrap();
        assert_eq!(trail.steps.len(), 2);
        assert_eq!(trail.steps[0].step_type, AuditStepType::Fetch);
        assert_eq!(trail.steps[1].step_type, AuditStepType::Extract);
        assert_eq!(trail.decision, Some(Decision::Saved));
        assert_eq!(trail.final_score, Some(0.8));
    }

    #[test]
    fn double_completion_is_a_noop() {
        let recorder = AuditRecorder::new();
        let trail_id = recorder.start_trail("c1", None);

        assert!(recorder.complete_trail(trail_id, Decision::Skipped, Some("relevance_fail"), None));
        assert!(!recorder.complete_trail(trail_id, Decision::Saved, None, Some(1.0)));

        let trail = recorder.get_trail(trail_id).unwrap();
        assert_eq!(trail.decision, Some(Decision::Skipped), "first decision is immutable");
        assert_eq!(trail.reason.as_deref(), Some("relevance_fail"));
    }

    #[test]
    fn steps_after_close_are_dropped() {
        let recorder = AuditRecorder::new();
        let trail_id = recorder.start_trail("c1", None);
        recorder.complete_trail(trail_id, Decision::Skipped, Some("duplicate"), None);

        recorder.add_step(trail_id, AuditStepType::Persist, json!({}), None);
        assert!(recorder.get_trail(trail_id).unwrap().steps.is_empty());
    }

    #[test]
    fn paging_walks_the_collection() {
        let recorder = AuditRecorder::new();
        for _ in 0..5 {
            let id = recorder.start_trail("c1", None);
            recorder.complete_trail(id, Decision::Saved, None, None);
        }
        recorder.start_trail("other", None);

        let first = recorder.trails("c1", None, 2);
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);

        let second = recorder.trails("c1", first.cursor.as_deref(), 2);
        assert_eq!(second.items.len(), 2);
        assert!(second.has_more);

        let third = recorder.trails("c1", second.cursor.as_deref(), 2);
        assert_eq!(third.items.len(), 1);
        assert!(!third.has_more);
        assert!(third.cursor.is_none());
    }

    #[test]
    fn stats_aggregate_decisions_reasons_and_steps() {
        let recorder = AuditRecorder::new();

        let saved = recorder.start_trail("c1", None);
        recorder.add_step(saved, AuditStepType::Fetch, json!({}), Some(100));
        recorder.complete_trail(saved, Decision::Saved, None, Some(0.9));

        for _ in 0..2 {
            let skipped = recorder.start_trail("c1", None);
            recorder.add_step(skipped, AuditStepType::Fetch, json!({}), Some(300));
            recorder.complete_trail(skipped, Decision::Skipped, Some("relevance_fail"), None);
        }
        let cooled = recorder.start_trail("c1", None);
        recorder.complete_trail(cooled, Decision::Skipped, Some("cooldown:9000"), None);

        let stats = recorder.get_stats("c1");
        assert_eq!(stats.total, 4);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.top_reasons[0], ("relevance_fail".to_string(), 2));
        assert!(stats.top_reasons.contains(&("cooldown".to_string(), 1)));
        let fetch_mean = stats.mean_step_ms[&AuditStepType::Fetch];
        assert!((fetch_mean - (100.0 + 300.0 + 300.0) / 3.0).abs() < f64::EPSILON);
        assert!(stats.mean_duration_ms >= 0.0);
    }

    #[test]
    fn degraded_tag_sticks() {
        let recorder = AuditRecorder::new();
        let trail_id = recorder.start_trail("c1", None);
        recorder.mark_degraded(trail_id);
        recorder.complete_trail(trail_id, Decision::Saved, None, None);
        assert!(recorder.get_trail(trail_id).unwrap().degraded);
    }
}
