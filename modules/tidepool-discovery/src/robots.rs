//! Basic robots.txt allow/deny check.
//!
//! Deliberately minimal: longest-prefix semantics are not implemented, only
//! prefix allow/disallow with allow-overrides, which is the policy level this
//! pipeline commits to. A missing or unreadable robots.txt allows everything.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Parsed rules for one host.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    disallow: Vec<String>,
    allow: Vec<String>,
}

impl RobotsRules {
    /// Parse the `User-agent: *` group of a robots.txt body. Agent-specific
    /// groups are ignored — this crawler always identifies with its own UA
    /// and honors the wildcard policy.
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut in_wildcard_group = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => in_wildcard_group = value == "*",
                "disallow" if in_wildcard_group && !value.is_empty() => {
                    rules.disallow.push(value.to_string());
                }
                "allow" if in_wildcard_group && !value.is_empty() => {
                    rules.allow.push(value.to_string());
                }
                _ => {}
            }
        }

        rules
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        // Allow rules take precedence over disallow.
        for allow in &self.allow {
            if path.starts_with(allow.as_str()) {
                return true;
            }
        }
        for disallow in &self.disallow {
            if disallow == "/" || path.starts_with(disallow.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Per-host robots.txt cache. Fetch failures are cached as allow-all so a
/// flaky robots endpoint cannot stall the pipeline.
pub struct RobotsCache {
    client: reqwest::Client,
    rules: Mutex<HashMap<String, RobotsRules>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched under the host's wildcard policy.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str().map(|h| h.to_lowercase()) else {
            return true;
        };

        let cached = self.rules.lock().expect("robots lock").get(&host).cloned();
        let rules = match cached {
            Some(rules) => rules,
            None => {
                let rules = self.fetch_rules(&parsed, &host).await;
                self.rules
                    .lock()
                    .expect("robots lock")
                    .insert(host.clone(), rules.clone());
                rules
            }
        };

        rules.is_allowed(parsed.path())
    }

    async fn fetch_rules(&self, parsed: &url::Url, host: &str) -> RobotsRules {
        let robots_url = format!(
            "{}://{}/robots.txt",
            parsed.scheme(),
            parsed.host_str().unwrap_or(host)
        );
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(_) => RobotsRules::default(),
            },
            Ok(_) | Err(_) => {
                debug!(host, "No readable robots.txt, allowing all");
                RobotsRules::default()
            }
        }
    }

    /// Seed the cache directly. Used by tests and by operators pre-blocking
    /// a host.
    pub fn put(&self, host: &str, rules: RobotsRules) {
        self.rules
            .lock()
            .expect("robots lock")
            .insert(host.to_lowercase(), rules);
    }
}
