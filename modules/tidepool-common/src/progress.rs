//! Live-progress event vocabulary.
//!
//! Pushed over a per-run broadcast channel for live display. Loss here is
//! observability-only — nothing downstream derives state from these events.

use serde::{Deserialize, Serialize};

/// A discrete progress event for a running collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    State {
        phase: String,
        found: u64,
        total: u64,
        done: u64,
        live: bool,
    },

    Found {
        count: u64,
    },

    Progress {
        done: u64,
        total: u64,
    },

    ItemReady {
        url: String,
        title: String,
        score: f64,
    },

    Error {
        message: String,
    },

    Complete {
        done: u64,
    },

    Heartbeat {},
}

impl ProgressEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::State { .. } => "state",
            ProgressEvent::Found { .. } => "found",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::ItemReady { .. } => "item_ready",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Heartbeat {} => "heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_internally_tagged() {
        let event = ProgressEvent::Progress { done: 3, total: 10 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["done"], 3);
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let event = ProgressEvent::Heartbeat {};
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }
}
