//! Same-origin link extraction from HTML fragments.
//!
//! Section summaries are free-form HTML and are frequently used as
//! announcement boards with embedded file links. Only anchors pointing back at
//! the course site are considered downloadable.

use scraper::{Html, Selector};
use url::Url;

/// Extracts links from HTML that point at the same origin as `origin`.
pub trait LinkExtractor: Send + Sync {
    /// Returns absolute URLs of anchors in `html` sharing `origin`'s scheme,
    /// host and port, in document order without duplicates.
    fn same_origin_links(&self, html: &str, origin: &Url) -> Vec<String>;
}

/// [`LinkExtractor`] backed by an HTML5 parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlLinkExtractor;

impl LinkExtractor for HtmlLinkExtractor {
    fn same_origin_links(&self, html: &str, origin: &Url) -> Vec<String> {
        let Ok(anchor) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let fragment = Html::parse_fragment(html);
        let mut links: Vec<String> = Vec::new();

        for element in fragment.select(&anchor) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = origin.join(href.trim()) else {
                continue;
            };
            if resolved.origin() != origin.origin() {
                continue;
            }
            let resolved = resolved.to_string();
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
        links
    }
}

/// Decodes HTML entities in a short text (course titles arrive escaped).
#[must_use]
pub fn decode_entities(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    fragment.root_element().text().collect::<String>()
}
