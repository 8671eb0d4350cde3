//! Operator control surface.
//!
//! Discrete operator actions against a running collection. Each action is
//! recorded as its own audit entry with `status=pending` the moment it is
//! submitted; the orchestrator drains pending actions at tick boundaries and
//! marks them applied.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use tidepool_common::{AuditStepType, Decision};

use crate::audit::AuditRecorder;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    PinSeed { url: String },
    AddSeed { url: String },
    BlockHost { host: String },
    BoostAngle { angle: String },
    SkipAngle { angle: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    Pending,
    Applied,
}

#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub id: Uuid,
    pub collection_id: String,
    pub action: ControlAction,
    pub status: ControlStatus,
    pub requested_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ControlQueue {
    requests: Mutex<Vec<ControlRequest>>,
}

impl ControlQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operator action. The audit entry is written immediately with
    /// pending status so the action is visible before it takes effect.
    pub fn submit(
        &self,
        collection_id: &str,
        action: ControlAction,
        recorder: &AuditRecorder,
    ) -> Uuid {
        let request = ControlRequest {
            id: Uuid::new_v4(),
            collection_id: collection_id.to_string(),
            action,
            status: ControlStatus::Pending,
            requested_at: Utc::now(),
        };

        let trail_id = recorder.start_trail(collection_id, None);
        recorder.add_step(
            trail_id,
            AuditStepType::Persist,
            json!({
                "operator_action": serde_json::to_value(&request.action)
                    .unwrap_or(serde_json::Value::Null),
                "status": "pending",
                "request_id": request.id,
            }),
            None,
        );
        recorder.complete_trail(trail_id, Decision::Saved, Some("operator_action"), None);

        let id = request.id;
        self.requests.lock().expect("control lock").push(request);
        id
    }

    /// Take every pending action, marking each applied. Called by the
    /// orchestrator at tick boundaries.
    pub fn drain_pending(&self, collection_id: &str) -> Vec<ControlRequest> {
        let mut requests = self.requests.lock().expect("control lock");
        let mut drained = Vec::new();
        for request in requests.iter_mut() {
            if request.status == ControlStatus::Pending && request.collection_id == collection_id {
                request.status = ControlStatus::Applied;
                drained.push(request.clone());
            }
        }
        drained
    }

    pub fn pending_count(&self, collection_id: &str) -> usize {
        self.requests
            .lock()
            .expect("control lock")
            .iter()
            .filter(|r| r.status == ControlStatus::Pending && r.collection_id == collection_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_records_pending_audit_entry() {
        let queue = ControlQueue::new();
        let recorder = AuditRecorder::new();

        queue.submit(
            "c1",
            ControlAction::BlockHost {
                host: "spam.example.com".to_string(),
            },
            &recorder,
        );

        assert_eq!(queue.pending_count("c1"), 1);
        let page = recorder.trails("c1", None, 10);
        assert_eq!(page.items.len(), 1);
        let step = &page.items[0].steps[0];
        assert_eq!(step.data["status"], "pending");
        assert_eq!(step.data["operator_action"]["action"], "block_host");
    }

    #[test]
    fn drain_applies_and_empties() {
        let queue = ControlQueue::new();
        let recorder = AuditRecorder::new();

        queue.submit(
            "c1",
            ControlAction::BoostAngle {
                angle: "controversy".to_string(),
            },
            &recorder,
        );
        queue.submit(
            "other",
            ControlAction::AddSeed {
                url: "https://example.com".to_string(),
            },
            &recorder,
        );

        let drained = queue.drain_pending("c1");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].status, ControlStatus::Applied);
        assert_eq!(queue.pending_count("c1"), 0);
        // The other collection's action is untouched.
        assert_eq!(queue.pending_count("other"), 1);
    }
}
