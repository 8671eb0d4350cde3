//! Content extraction — fetched HTML to a readable-text document.
//!
//! Readability extraction prefers the semantic article/main container and
//! falls back to a tag-stripped full body. A companion quote picker selects
//! up to two information-dense paragraphs under a fair-use word budget.

use chrono::{DateTime, Utc};
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use tidepool_common::{ExtractedDocument, TidepoolError};

/// Combined word budget across all fair-use quotes.
const FAIR_USE_WORD_BUDGET: usize = 180;
/// At most this many quotes per document.
const MAX_QUOTES: usize = 2;

/// Phrases that mark a metered/paywalled page body.
const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to continue reading",
    "subscribe to read",
    "this article is for subscribers",
    "create a free account to continue",
    "sign in to keep reading",
    "you've reached your free article limit",
];

/// Extract a readable-text document from fetched HTML.
///
/// Returns an error only for structurally empty results; byline, site name,
/// and publish time are best-effort.
pub fn extract(html: &str, url: &str) -> Result<ExtractedDocument, TidepoolError> {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let mut text = transform_content_input(input, &config);
    if text.trim().is_empty() {
        // Readability found no main container — fall back to the full body
        // with script/style/nav chrome stripped.
        text = strip_to_text(html);
    }
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(TidepoolError::Extraction(format!(
            "no extractable text for {url}"
        )));
    }

    let title = meta_content(html, "og:title")
        .or_else(|| tag_text(html, "title"))
        .unwrap_or_else(|| url.to_string());

    let quotes = pick_fair_use_quotes(&text);

    Ok(ExtractedDocument {
        title,
        text,
        byline: meta_content(html, "author").or_else(|| meta_content(html, "article:author")),
        site_name: meta_content(html, "og:site_name"),
        published_time: meta_content(html, "article:published_time")
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        quotes,
    })
}

/// Select up to two paragraphs maximizing an information-density score,
/// bounded to a combined 180-word budget. Exists to support citation display
/// without exceeding fair-use norms.
pub fn pick_fair_use_quotes(text: &str) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.split_whitespace().count() >= 12 && !p.starts_with('#'))
        .map(|p| (density_score(p), p))
        .collect();

    // Highest density first; stable beyond that via original order.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut quotes = Vec::new();
    let mut budget = FAIR_USE_WORD_BUDGET;
    for (_, paragraph) in scored {
        if quotes.len() == MAX_QUOTES {
            break;
        }
        let words = paragraph.split_whitespace().count();
        if words <= budget {
            budget -= words;
            quotes.push(paragraph.to_string());
        } else if quotes.is_empty() {
            // Even the densest paragraph overflows the budget — truncate it
            // rather than returning nothing.
            let truncated: Vec<&str> = paragraph.split_whitespace().take(budget).collect();
            quotes.push(format!("{}…", truncated.join(" ")));
            break;
        }
    }
    quotes
}

/// Information density: word count, average sentence length, and
/// named-entity-like (capitalized, non-sentence-initial) token count.
fn density_score(paragraph: &str) -> f64 {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    let word_count = words.len() as f64;

    let sentences = paragraph
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let avg_sentence_len = word_count / sentences as f64;

    let entity_like = words
        .iter()
        .skip(1)
        .filter(|w| {
            w.chars()
                .next()
                .map(|c| c.is_uppercase())
                .unwrap_or(false)
        })
        .count() as f64;

    word_count + 2.0 * avg_sentence_len + 3.0 * entity_like
}

/// Heuristic paywall detection on the raw HTML body.
pub fn looks_paywalled(html: &str) -> bool {
    let lowered = html.to_lowercase();
    PAYWALL_MARKERS.iter().any(|m| lowered.contains(m))
}

// ---------------------------------------------------------------------------
// Fallback stripping + meta scraping
// ---------------------------------------------------------------------------

/// Full-body fallback: strip script/style/nav/header/footer, drop remaining
/// tags, collapse whitespace.
fn strip_to_text(html: &str) -> String {
    let chrome = regex::Regex::new(
        r"(?si)<(script|style|nav|header|footer|aside)[^>]*>.*?</(script|style|nav|header|footer|aside)>",
    )
    .expect("valid chrome regex");
    let tags = regex::Regex::new(r"<[^>]+>").expect("valid tag regex");
    let blank = regex::Regex::new(r"\n{3,}").expect("valid blank regex");

    let text = chrome.replace_all(html, "");
    let text = tags.replace_all(&text, "\n");
    let text = blank.replace_all(&text, "\n\n");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

/// Pull `content` from a `<meta>` tag by `name` or `property`.
fn meta_content(html: &str, key: &str) -> Option<String> {
    let pattern = format!(
        r#"(?si)<meta[^>]+(?:name|property)\s*=\s*["']{}["'][^>]*>"#,
        regex::escape(key)
    );
    let tag_re = regex::Regex::new(&pattern).ok()?;
    let content_re = regex::Regex::new(r#"content\s*=\s*["']([^"']+)["']"#).ok()?;

    let tag = tag_re.find(html)?.as_str();
    let value = content_re.captures(tag)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Inner text of the first occurrence of a tag.
fn tag_text(html: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?si)<{tag}[^>]*>(.*?)</{tag}>");
    let re = regex::Regex::new(&pattern).ok()?;
    let value = re.captures(html)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html><head>
        <title>Fallback Title</title>
        <meta property="og:title" content="Council Approves Budget">
        <meta property="og:site_name" content="Example Tribune">
        <meta name="author" content="Dana Reyes">
        <meta property="article:published_time" content="2026-03-01T09:30:00Z">
        </head><body>
        <nav>Home | News</nav>
        <article><p>The city council voted 7-2 on Tuesday to approve the 2026 budget,
        a package that raises spending on road repair by twelve percent while holding
        the property tax levy flat for the third consecutive year.</p>
        <p>Mayor Helen Okafor called the vote a turning point for the Parks Department,
        which gains four full-time positions under the plan adopted by the Council.</p></article>
        <footer>Copyright</footer>
        </body></html>"#;

    #[test]
    fn extracts_title_and_meta() {
        let doc = extract(ARTICLE, "https://example.com/story").unwrap();
        assert_eq!(doc.title, "Council Approves Budget");
        assert_eq!(doc.site_name.as_deref(), Some("Example Tribune"));
        assert_eq!(doc.byline.as_deref(), Some("Dana Reyes"));
        assert!(doc.published_time.is_some());
        assert!(doc.text.contains("city council"), "body text extracted: {}", doc.text);
    }

    #[test]
    fn empty_html_is_an_error() {
        assert!(extract("", "https://example.com").is_err());
    }

    #[test]
    fn fallback_strips_chrome() {
        let html = "<body><nav>menu</nav><p>Real content with several words here to keep.</p><script>x()</script></body>";
        let text = strip_to_text(html);
        assert!(text.contains("Real content"));
        assert!(!text.contains("menu"));
        assert!(!text.contains("x()"));
    }

    #[test]
    fn quotes_respect_budget_and_count() {
        let long_paragraph = "Word ".repeat(120);
        let denser = "The Fillmore Commission granted Acme Corp a permit on March 4. \
            It covers nine sites across Lake County and requires quarterly review by the Board. \
            Officials said the decision followed eighteen months of hearings."
            .to_string();
        let text = format!("{long_paragraph}\n\n{denser}\n\n{long_paragraph}");

        let quotes = pick_fair_use_quotes(&text);
        assert!(!quotes.is_empty());
        assert!(quotes.len() <= MAX_QUOTES);
        let total_words: usize = quotes.iter().map(|q| q.split_whitespace().count()).sum();
        assert!(
            total_words <= FAIR_USE_WORD_BUDGET,
            "quote budget exceeded: {total_words}"
        );
    }

    #[test]
    fn oversized_single_paragraph_truncated() {
        let huge = "Senator Alvarez announced the Denton Bridge project today. ".repeat(40);
        let quotes = pick_fair_use_quotes(&huge);
        assert_eq!(quotes.len(), 1);
        let words = quotes[0].split_whitespace().count();
        assert!(words <= FAIR_USE_WORD_BUDGET, "truncated to budget: {words}");
        assert!(quotes[0].ends_with('…'));
    }

    #[test]
    fn entity_rich_paragraph_outscores_filler() {
        let filler = "it was a day like any other day and nothing much happened at all around here";
        let dense = "Governor Ruiz met Senator Park at the Capitol in Austin on Friday";
        assert!(density_score(dense) > density_score(filler));
    }

    #[test]
    fn paywall_markers_detected() {
        assert!(looks_paywalled(
            "<div class=\"gate\">Subscribe to continue reading this story.</div>"
        ));
        assert!(!looks_paywalled("<p>Free and open reporting.</p>"));
    }
}
