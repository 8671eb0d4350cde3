//! Query expansion — planner candidates to concrete search URLs.
//!
//! Expansion is deliberately stingy: per-host and global caps keep any one
//! engine from being flooded, and general (non-site-filtered) queries are
//! withheld until cheaper targeted queries have had their chance. Structured
//! knowledge sources skip query synthesis entirely and harvest their
//! reference lists instead.

use chrono::NaiveDate;
use tracing::debug;

use tidepool_common::{host_of, same_host, Cursor, FrontierItem, Provider, QuerySuggestion};

// --- Constants ---

/// Hard ceiling on suggestions per expansion call.
const MAX_TOTAL_SUGGESTIONS: usize = 20;
/// No generated host may appear more often than this per call.
const MAX_PER_HOST: usize = 3;
/// General expansion unlocks once an item has been attempted this many times…
const GENERAL_UNLOCK_ATTEMPTS: u32 = 2;
/// …or once the frontier has seen this much total dequeue volume.
const GENERAL_UNLOCK_DEQUEUES: u64 = 30;

/// Overridable limits. Defaults mirror the module constants.
#[derive(Debug, Clone)]
pub struct ExpanderLimits {
    pub max_total: usize,
    pub max_per_host: usize,
    pub general_unlock_attempts: u32,
    pub general_unlock_dequeues: u64,
}

impl Default for ExpanderLimits {
    fn default() -> Self {
        Self {
            max_total: MAX_TOTAL_SUGGESTIONS,
            max_per_host: MAX_PER_HOST,
            general_unlock_attempts: GENERAL_UNLOCK_ATTEMPTS,
            general_unlock_dequeues: GENERAL_UNLOCK_DEQUEUES,
        }
    }
}

/// Result of one expansion call.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub suggestions: Vec<QuerySuggestion>,
    /// True when general expansion was withheld pending the unlock threshold.
    pub deferred_general: bool,
}

// --- Search engines ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchEngine {
    DuckDuckGo,
    Bing,
    Brave,
    GoogleNews,
}

const WEB_ENGINES: &[SearchEngine] = &[
    SearchEngine::DuckDuckGo,
    SearchEngine::Bing,
    SearchEngine::Brave,
];

const NEWS_ENGINES: &[SearchEngine] = &[SearchEngine::GoogleNews];

impl SearchEngine {
    fn base(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "https://duckduckgo.com/html/",
            SearchEngine::Bing => "https://www.bing.com/search",
            SearchEngine::Brave => "https://search.brave.com/search",
            SearchEngine::GoogleNews => "https://news.google.com/search",
        }
    }

    /// Build a search URL for `terms`. When `min_pub_date` is set the query
    /// embeds an `after:` token — a hard requirement, not best-effort.
    fn search_url(&self, terms: &str, min_pub_date: Option<NaiveDate>) -> String {
        let mut query = terms.to_string();
        if let Some(date) = min_pub_date {
            query.push_str(&format!(" after:{}", date.format("%Y-%m-%d")));
        }
        let mut url = url::Url::parse(self.base()).expect("engine base URL is valid");
        url.query_pairs_mut().append_pair("q", &query);
        url.to_string()
    }
}

// --- Expander ---

pub struct QueryExpander {
    limits: ExpanderLimits,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(ExpanderLimits::default())
    }
}

impl QueryExpander {
    pub fn new(limits: ExpanderLimits) -> Self {
        Self { limits }
    }

    /// Expand a keyword/title candidate into engine search URLs.
    ///
    /// Site-filtered queries are always produced. General queries are withheld
    /// until `attempt` or `total_dequeues` crosses its unlock threshold; when
    /// anything was withheld, `deferred_general` is set.
    pub fn expand(&self, item: &FrontierItem, attempt: u32, total_dequeues: u64) -> Expansion {
        let (keywords, site_filters) = match &item.cursor {
            Cursor::Keywords {
                keywords,
                site_filters,
            } => (keywords.clone(), site_filters.clone()),
            Cursor::PageTitle { title } => (vec![title.clone()], Vec::new()),
            Cursor::RawUrl { .. } => return Expansion::default(),
        };
        if keywords.is_empty() {
            return Expansion::default();
        }

        let engines = match item.provider {
            Provider::NewsSearch => NEWS_ENGINES,
            _ => WEB_ENGINES,
        };
        let base_query = keywords.join(" ");
        let min_pub_date = item.meta.min_pub_date;

        let general_unlocked = attempt >= self.limits.general_unlock_attempts
            || total_dequeues >= self.limits.general_unlock_dequeues;

        let mut raw: Vec<QuerySuggestion> = Vec::new();

        // Targeted queries first: one per site filter per engine.
        for site in &site_filters {
            let terms = format!("site:{site} {base_query}");
            for engine in engines {
                raw.push(self.suggestion(item, engine.search_url(&terms, min_pub_date)));
            }
        }

        if general_unlocked {
            for terms in query_variants(&base_query) {
                for engine in engines {
                    raw.push(self.suggestion(item, engine.search_url(&terms, min_pub_date)));
                }
            }
        } else {
            debug!(
                item_id = %item.id,
                attempt,
                total_dequeues,
                "General expansion deferred below unlock threshold"
            );
        }

        Expansion {
            suggestions: self.apply_caps(raw),
            deferred_general: !general_unlocked,
        }
    }

    /// Reference harvest for structured knowledge sources: emit one
    /// suggestion per off-site link in the page's reference list, never
    /// linking back to the source's own domain.
    pub fn harvest_references(
        &self,
        item: &FrontierItem,
        html: &str,
        base_url: &str,
    ) -> Vec<QuerySuggestion> {
        let section = reference_section(html);
        let links = extract_links(section, base_url);

        let mut seen = std::collections::HashSet::new();
        let raw: Vec<QuerySuggestion> = links
            .into_iter()
            .filter(|link| !same_host(link, base_url))
            .filter(|link| seen.insert(link.clone()))
            .map(|link| self.suggestion(item, link))
            .collect();

        self.apply_caps(raw)
    }

    fn suggestion(&self, item: &FrontierItem, url: String) -> QuerySuggestion {
        QuerySuggestion {
            host: host_of(&url),
            url,
            angle: item.angle.clone(),
            generated_from: item.id,
        }
    }

    /// Enforce the per-host and global caps, preserving order.
    fn apply_caps(&self, raw: Vec<QuerySuggestion>) -> Vec<QuerySuggestion> {
        let mut per_host: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut out = Vec::new();
        for suggestion in raw {
            if out.len() == self.limits.max_total {
                break;
            }
            let count = per_host.entry(suggestion.host.clone()).or_insert(0);
            if *count >= self.limits.max_per_host {
                continue;
            }
            *count += 1;
            out.push(suggestion);
        }
        out
    }
}

/// Mutate a base query into its search variants: the plain terms, plus an
/// exact-phrase form when the query is multi-word.
fn query_variants(base: &str) -> Vec<String> {
    let mut variants = vec![base.to_string()];
    if base.split_whitespace().count() > 1 {
        variants.push(format!("\"{base}\""));
    }
    variants
}

/// Slice the document from its reference/citation section to the end; when no
/// such marker exists, the whole document is the section.
fn reference_section(html: &str) -> &str {
    let marker = regex::Regex::new(r#"(?i)(id|class)\s*=\s*["'][^"']*(reference|citation)"#)
        .expect("valid reference marker regex");
    match marker.find(html) {
        Some(m) => &html[m.start()..],
        None => html,
    }
}

/// Pull absolute http(s) links out of HTML, resolving relative hrefs against
/// `base_url`.
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let href_re = regex::Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid href regex");
    let base = url::Url::parse(base_url).ok();

    let mut links = Vec::new();
    for cap in href_re.captures_iter(html) {
        let raw = &cap[1];
        if raw.starts_with('#') || raw.starts_with("javascript:") || raw.starts_with("mailto:") {
            continue;
        }
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(ref b) = base {
            match b.join(raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };
        links.push(resolved);
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use tidepool_common::ItemMeta;

    fn keyword_item(keywords: &[&str], site_filters: &[&str]) -> FrontierItem {
        FrontierItem::new(
            Provider::WebSearch,
            Cursor::Keywords {
                keywords: keywords.iter().map(|s| s.to_string()).collect(),
                site_filters: site_filters.iter().map(|s| s.to_string()).collect(),
            },
            5,
            "recent_coverage",
        )
    }

    #[test]
    fn general_expansion_deferred_below_unlock() {
        let expander = QueryExpander::default();
        let item = keyword_item(&["budget hearing"], &[]);

        let expansion = expander.expand(&item, 0, 0);
        assert!(expansion.deferred_general);
        assert!(expansion.suggestions.is_empty());
    }

    #[test]
    fn attempt_threshold_unlocks_general() {
        let expander = QueryExpander::default();
        let item = keyword_item(&["budget hearing"], &[]);

        let expansion = expander.expand(&item, GENERAL_UNLOCK_ATTEMPTS, 40);
        assert!(!expansion.deferred_general);
        assert!(!expansion.suggestions.is_empty());
        assert!(expansion.suggestions.len() <= MAX_TOTAL_SUGGESTIONS);

        let mut per_host: HashMap<&str, usize> = HashMap::new();
        for s in &expansion.suggestions {
            *per_host.entry(s.host.as_str()).or_insert(0) += 1;
        }
        assert!(
            per_host.values().all(|&n| n <= MAX_PER_HOST),
            "per-host cap violated: {per_host:?}"
        );
    }

    #[test]
    fn dequeue_volume_unlocks_general() {
        let expander = QueryExpander::default();
        let item = keyword_item(&["budget hearing"], &[]);

        let expansion = expander.expand(&item, 0, GENERAL_UNLOCK_DEQUEUES);
        assert!(!expansion.deferred_general);
        assert!(!expansion.suggestions.is_empty());
    }

    #[test]
    fn site_filters_expand_even_when_general_deferred() {
        let expander = QueryExpander::default();
        let item = keyword_item(&["budget hearing"], &["citycouncil.example.gov"]);

        let expansion = expander.expand(&item, 0, 0);
        assert!(expansion.deferred_general, "general part still withheld");
        assert!(!expansion.suggestions.is_empty());
        for s in &expansion.suggestions {
            assert!(
                s.url.contains("site%3Acitycouncil.example.gov"),
                "site filter missing from {}",
                s.url
            );
        }
    }

    #[test]
    fn min_pub_date_embedded_in_every_url() {
        let expander = QueryExpander::default();
        let meta = ItemMeta {
            min_pub_date: Some(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
            ..Default::default()
        };
        let item = keyword_item(&["dam removal"], &["example.org"]).with_meta(meta);

        let expansion = expander.expand(&item, GENERAL_UNLOCK_ATTEMPTS, 0);
        assert!(!expansion.suggestions.is_empty());
        for s in &expansion.suggestions {
            assert!(
                s.url.contains("after%3A2026-01-15"),
                "freshness filter missing from {}",
                s.url
            );
        }
    }

    #[test]
    fn news_provider_uses_news_engine() {
        let expander = QueryExpander::default();
        let mut item = keyword_item(&["flood recovery"], &[]);
        item.provider = Provider::NewsSearch;

        let expansion = expander.expand(&item, GENERAL_UNLOCK_ATTEMPTS, 0);
        assert!(!expansion.suggestions.is_empty());
        assert!(expansion
            .suggestions
            .iter()
            .all(|s| s.host == "news.google.com"));
    }

    #[test]
    fn raw_url_cursor_is_not_expanded() {
        let expander = QueryExpander::default();
        let item = FrontierItem::new(
            Provider::Direct,
            Cursor::raw_url("https://example.com/a"),
            5,
            "seed",
        );
        let expansion = expander.expand(&item, 5, 100);
        assert!(expansion.suggestions.is_empty());
        assert!(!expansion.deferred_general);
    }

    #[test]
    fn caps_bound_total_and_per_host() {
        let limits = ExpanderLimits {
            max_total: 4,
            max_per_host: 1,
            ..Default::default()
        };
        let expander = QueryExpander::new(limits);
        // Three site filters across three engines would make nine without caps.
        let item = keyword_item(
            &["harbor dredging"],
            &["a.example.gov", "b.example.gov", "c.example.gov"],
        );

        let expansion = expander.expand(&item, GENERAL_UNLOCK_ATTEMPTS, 0);
        assert!(expansion.suggestions.len() <= 4);
        let mut per_host: HashMap<&str, usize> = HashMap::new();
        for s in &expansion.suggestions {
            *per_host.entry(s.host.as_str()).or_insert(0) += 1;
        }
        assert!(per_host.values().all(|&n| n <= 1));
    }

    #[test]
    fn reference_harvest_excludes_own_domain() {
        let expander = QueryExpander::default();
        let item = FrontierItem::new(
            Provider::Encyclopedia,
            Cursor::raw_url("https://knowledge.example.org/wiki/Harbor_Bridge"),
            5,
            "origins",
        );
        let html = r#"
            <p>Body text with an <a href="/wiki/Other_Page">internal link</a>.</p>
            <ol class="references">
              <li><a href="https://tribune.example.com/story/bridge">External one</a></li>
              <li><a href="https://archive.example.net/doc/42">External two</a></li>
              <li><a href="https://knowledge.example.org/wiki/Self">Self link</a></li>
            </ol>
        "#;

        let suggestions = expander.harvest_references(
            &item,
            html,
            "https://knowledge.example.org/wiki/Harbor_Bridge",
        );
        assert_eq!(suggestions.len(), 2, "exactly the off-site references");
        assert!(suggestions
            .iter()
            .all(|s| !s.url.contains("knowledge.example.org")));
    }

    #[test]
    fn reference_harvest_scopes_to_reference_section() {
        let expander = QueryExpander::default();
        let item = FrontierItem::new(
            Provider::Encyclopedia,
            Cursor::raw_url("https://knowledge.example.org/wiki/Topic"),
            5,
            "origins",
        );
        let html = r#"
            <p><a href="https://unrelated.example.com/above">Above the fold</a></p>
            <div id="references">
              <a href="https://cited.example.com/paper">Cited work</a>
            </div>
        "#;

        let suggestions =
            expander.harvest_references(&item, html, "https://knowledge.example.org/wiki/Topic");
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].host, "cited.example.com");
    }

    #[test]
    fn query_variants_quote_multiword() {
        let variants = query_variants("budget hearing");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1], "\"budget hearing\"");
        assert_eq!(query_variants("budget").len(), 1);
    }
}
