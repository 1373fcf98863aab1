//! RSS/Atom normalization shared by the syndication-based adapters.

use crate::error::{PanelistError, Result};
use crate::models::WebSource;
use feed_rs::model::Entry;
use scraper::{Html, Selector};
use std::sync::LazyLock;

static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").expect("Invalid selector"));

/// Plain text of an HTML fragment, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Links to the same story at other outlets, listed in an entry summary.
pub fn sibling_links(summary_html: &str, own_url: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(summary_html);
    let mut links: Vec<String> = Vec::new();
    for element in fragment.select(&LINK) {
        if let Some(href) = element.value().attr("href") {
            let href = href.trim();
            if href.starts_with("http") && href != own_url && !links.iter().any(|l| l == href) {
                links.push(href.to_string());
            }
        }
    }
    links
}

fn entry_image(entry: &Entry) -> Option<String> {
    for media in &entry.media {
        if let Some(thumb) = media.thumbnails.first() {
            return Some(thumb.image.uri.clone());
        }
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .is_some_and(|m| m.ty() == "image");
            if let (true, Some(url)) = (is_image, &content.url) {
                return Some(url.to_string());
            }
        }
    }
    entry
        .links
        .iter()
        .find(|l| l.media_type.as_deref().is_some_and(|t| t.starts_with("image/")))
        .map(|l| l.href.clone())
}

fn entry_to_source(entry: &Entry, source_label: &str, language: Option<&str>) -> Option<WebSource> {
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
        .or(entry.links.first())
        .map(|l| l.href.trim().to_string())?;
    let title = entry
        .title
        .as_ref()
        .map(|t| html_to_text(&t.content))
        .unwrap_or_default();

    let mut source = WebSource::new(title, url.clone(), source_label);
    if let Some(summary) = &entry.summary {
        let text = html_to_text(&summary.content);
        if !text.is_empty() {
            source.description = Some(text);
        }
        source.linked_items = sibling_links(&summary.content, &url);
    }
    source.publish_date = entry.published.or(entry.updated);
    source.categories = entry
        .categories
        .iter()
        .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
        .filter(|c| !c.is_empty())
        .collect();
    source.image = entry_image(entry);
    source.language = language.map(str::to_string);
    Some(source)
}

/// Parse an RSS or Atom document into unresolved sources, newest first, capped at `limit`.
pub fn parse_feed(bytes: &[u8], source_label: &str, limit: usize) -> Result<Vec<WebSource>> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| PanelistError::Feed(format!("Unparseable feed: {}", e)))?;
    let language = feed.language.clone();
    let mut sources: Vec<WebSource> = feed
        .entries
        .iter()
        .filter_map(|e| entry_to_source(e, source_label, language.as_deref()))
        .collect();
    sources.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
    sources.truncate(limit);
    Ok(sources)
}
