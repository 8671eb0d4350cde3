//! Suggestion filter — dedup and per-host cooldown gating.
//!
//! Rules run in a fixed order per suggestion: seed check, seen check, then
//! cooldown. The first two are cheap lookups and must short-circuit before
//! the cooldown claim mutates any state.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use tidepool_common::{canonical_url, QuerySuggestion};

use crate::stores::{CooldownClaim, CooldownStore, SeenIndex};

/// Minimum interval before a host may be targeted again by new suggestions.
const COOLDOWN_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub cooldown_window: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cooldown_window: Duration::seconds(COOLDOWN_WINDOW_SECS),
        }
    }
}

/// Why a suggestion was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SeedDuplicate,
    AlreadySeen,
    Cooldown { remaining_ms: i64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SeedDuplicate => write!(f, "seed_duplicate"),
            SkipReason::AlreadySeen => write!(f, "already_seen"),
            SkipReason::Cooldown { remaining_ms } => write!(f, "cooldown:{remaining_ms}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<QuerySuggestion>,
    pub skipped: Vec<(QuerySuggestion, SkipReason)>,
}

pub struct SuggestionFilter {
    config: FilterConfig,
}

impl Default for SuggestionFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

impl SuggestionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Partition suggestions into accepted and skipped. Every input lands in
    /// exactly one bucket. Accepting a suggestion claims its host's cooldown,
    /// so a second pass over the same host inside the window is rejected.
    pub async fn filter(
        &self,
        suggestions: Vec<QuerySuggestion>,
        seeds: &HashSet<String>,
        seen: &dyn SeenIndex,
        cooldowns: &dyn CooldownStore,
        now: DateTime<Utc>,
    ) -> Result<FilterOutcome> {
        let mut outcome = FilterOutcome::default();

        for suggestion in suggestions {
            let canonical = canonical_url(&suggestion.url);

            if seeds.contains(&canonical) {
                outcome.skipped.push((suggestion, SkipReason::SeedDuplicate));
                continue;
            }

            if seen.is_seen(&canonical).await? {
                outcome.skipped.push((suggestion, SkipReason::AlreadySeen));
                continue;
            }

            match cooldowns
                .try_claim(&suggestion.host, now, self.config.cooldown_window)
                .await?
            {
                CooldownClaim::Claimed => outcome.accepted.push(suggestion),
                CooldownClaim::Cooling { remaining_ms } => {
                    outcome
                        .skipped
                        .push((suggestion, SkipReason::Cooldown { remaining_ms }));
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::stores::{MemoryCooldowns, MemorySeenIndex};

    fn suggestion(url: &str) -> QuerySuggestion {
        QuerySuggestion {
            url: url.to_string(),
            host: tidepool_common::host_of(url),
            angle: "recent_coverage".to_string(),
            generated_from: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn partition_is_total() {
        let filter = SuggestionFilter::default();
        let seen = MemorySeenIndex::new();
        let cooldowns = MemoryCooldowns::new();
        let mut seeds = HashSet::new();
        seeds.insert(canonical_url("https://seeded.example.com/story"));

        let input = vec![
            suggestion("https://seeded.example.com/story"),
            suggestion("https://a.example.com/one"),
            suggestion("https://a.example.com/two"),
            suggestion("https://b.example.com/one"),
        ];
        let input_len = input.len();

        let outcome = filter
            .filter(input, &seeds, &seen, &cooldowns, Utc::now())
            .await
            .unwrap();

        assert_eq!(outcome.accepted.len() + outcome.skipped.len(), input_len);
        assert_eq!(outcome.skipped[0].1, SkipReason::SeedDuplicate);
        // Second a.example.com suggestion hits the cooldown the first one set.
        assert!(matches!(
            outcome.skipped[1].1,
            SkipReason::Cooldown { .. }
        ));
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[tokio::test]
    async fn seen_urls_rejected_before_cooldown_mutation() {
        let filter = SuggestionFilter::default();
        let seen = MemorySeenIndex::new();
        seen.mark_seen(&canonical_url("https://a.example.com/old"))
            .await
            .unwrap();
        let cooldowns = MemoryCooldowns::new();
        let seeds = HashSet::new();

        let outcome = filter
            .filter(
                vec![suggestion("https://a.example.com/old")],
                &seeds,
                &seen,
                &cooldowns,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.skipped[0].1, SkipReason::AlreadySeen);
        // The seen rejection must not have started a cooldown for the host.
        assert!(cooldowns.get("a.example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accept_then_immediate_refilter_is_cooldown_rejected() {
        let filter = SuggestionFilter::default();
        let seen = MemorySeenIndex::new();
        let cooldowns = MemoryCooldowns::new();
        let seeds = HashSet::new();
        let now = Utc::now();

        let first = filter
            .filter(
                vec![suggestion("https://a.example.com/one")],
                &seeds,
                &seen,
                &cooldowns,
                now,
            )
            .await
            .unwrap();
        assert_eq!(first.accepted.len(), 1);

        let second = filter
            .filter(
                vec![suggestion("https://a.example.com/two")],
                &seeds,
                &seen,
                &cooldowns,
                now,
            )
            .await
            .unwrap();
        assert!(second.accepted.is_empty());
        match &second.skipped[0].1 {
            SkipReason::Cooldown { remaining_ms } => assert!(*remaining_ms > 0),
            other => panic!("expected cooldown rejection, got {other:?}"),
        }

        // Past the window the host is acceptable again.
        let later = now + Duration::seconds(COOLDOWN_WINDOW_SECS + 1);
        let third = filter
            .filter(
                vec![suggestion("https://a.example.com/three")],
                &seeds,
                &seen,
                &cooldowns,
                later,
            )
            .await
            .unwrap();
        assert_eq!(third.accepted.len(), 1);
    }

    #[test]
    fn skip_reason_display_encodes_remaining() {
        let reason = SkipReason::Cooldown { remaining_ms: 4200 };
        assert_eq!(reason.to_string(), "cooldown:4200");
        assert_eq!(SkipReason::SeedDuplicate.to_string(), "seed_duplicate");
        assert_eq!(SkipReason::AlreadySeen.to_string(), "already_seen");
    }
}
