use std::env;

use tracing::info;

/// Runtime configuration loaded from environment variables.
///
/// Threshold constants that shape component behavior (cooldown window,
/// general-unlock attempts, audit cutoffs) live as named constants next to
/// the logic they govern, not here. This struct only carries the operational
/// knobs an operator tunes per deployment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether the JS renderer is available for fetch (plain HTTP otherwise).
    pub renderer_enabled: bool,
    /// Max concurrent render slots when the renderer is enabled.
    pub render_concurrency: usize,

    /// Hard minimum of unique domains a run must draw from before persisting.
    pub min_unique_domains: usize,
    /// Warn-only threshold for unique-domain diversity.
    pub warn_unique_domains: usize,

    /// Connect/read timeout for a single fetch, in seconds.
    pub fetch_timeout_secs: u64,
    /// Additional wait for late-arriving content on rendered pages, in seconds.
    pub content_wait_secs: u64,

    /// Minimum extracted-text bytes for a full-quality document.
    pub min_text_bytes_full: usize,
    /// Minimum extracted-text bytes below which extraction is rejected outright.
    pub min_text_bytes_partial: usize,

    /// Hero-image batch size handed to the (external) hero pipeline.
    pub hero_batch_size: usize,
    /// Hero-image batch concurrency.
    pub hero_concurrency: usize,

    /// Worker loops draining the frontier.
    pub worker_count: usize,
    /// Minimum interval between dequeues per worker, in milliseconds.
    pub throttle_ms: u64,
    /// Maximum items processed per orchestrator tick.
    pub max_items_per_tick: usize,

    /// Fallback seed domains used when planner-supplied seeds are too sparse.
    pub fallback_seed_domains: Vec<String>,
}

/// Domains used to seed a collection when the planner supplies too few.
const DEFAULT_FALLBACK_SEEDS: &[&str] = &[
    "apnews.com",
    "reuters.com",
    "npr.org",
    "bbc.com",
    "theguardian.com",
];

impl Config {
    /// Load configuration from environment variables. Every knob has a
    /// default; nothing here panics on absence.
    pub fn from_env() -> Self {
        Self {
            renderer_enabled: env_bool("TIDEPOOL_RENDERER_ENABLED", false),
            render_concurrency: env_parse("TIDEPOOL_RENDER_CONCURRENCY", 2),
            min_unique_domains: env_parse("TIDEPOOL_MIN_UNIQUE_DOMAINS", 3),
            warn_unique_domains: env_parse("TIDEPOOL_WARN_UNIQUE_DOMAINS", 5),
            fetch_timeout_secs: env_parse("TIDEPOOL_FETCH_TIMEOUT_SECS", 20),
            content_wait_secs: env_parse("TIDEPOOL_CONTENT_WAIT_SECS", 5),
            min_text_bytes_full: env_parse("TIDEPOOL_MIN_TEXT_BYTES_FULL", 1200),
            min_text_bytes_partial: env_parse("TIDEPOOL_MIN_TEXT_BYTES_PARTIAL", 350),
            hero_batch_size: env_parse("TIDEPOOL_HERO_BATCH_SIZE", 8),
            hero_concurrency: env_parse("TIDEPOOL_HERO_CONCURRENCY", 2),
            worker_count: env_parse("TIDEPOOL_WORKERS", 4),
            throttle_ms: env_parse("TIDEPOOL_THROTTLE_MS", 250),
            max_items_per_tick: env_parse("TIDEPOOL_MAX_ITEMS_PER_TICK", 12),
            fallback_seed_domains: env::var("TIDEPOOL_FALLBACK_SEED_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| {
                    DEFAULT_FALLBACK_SEEDS.iter().map(|s| s.to_string()).collect()
                }),
        }
    }

    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        info!(
            renderer = self.renderer_enabled,
            workers = self.worker_count,
            throttle_ms = self.throttle_ms,
            max_per_tick = self.max_items_per_tick,
            fetch_timeout_secs = self.fetch_timeout_secs,
            min_text_full = self.min_text_bytes_full,
            min_text_partial = self.min_text_bytes_partial,
            fallback_seeds = self.fallback_seed_domains.len(),
            "Tidepool config loaded"
        );
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let config = Config::from_env();
        assert!(config.worker_count >= 1);
        assert!(config.min_text_bytes_partial < config.min_text_bytes_full);
        assert!(!config.fallback_seed_domains.is_empty());
    }
}
