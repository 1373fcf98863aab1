//! Pseudo-feed over user-supplied URLs.

use super::FeedAdapter;
use crate::error::Result;
use crate::models::WebSource;
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// Accept a string (whitespace, comma or newline separated) or a list of strings.
/// Invalid URLs and duplicates are dropped.
pub fn parse_url_input(input: &Value) -> Vec<String> {
    let raw: Vec<String> = match input {
        Value::String(s) => s
            .split(|c: char| c.is_whitespace() || c == ',')
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    let mut urls: Vec<String> = Vec::new();
    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        let valid = Url::parse(candidate)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        if valid && !urls.iter().any(|u| u == candidate) {
            urls.push(candidate.to_string());
        }
    }
    urls
}

pub struct UrlListFeed {
    urls: Vec<String>,
}

impl UrlListFeed {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

#[async_trait]
impl FeedAdapter for UrlListFeed {
    fn name(&self) -> String {
        format!("urls:{}", self.urls.len())
    }

    async fn fetch(&self) -> Result<Vec<WebSource>> {
        Ok(self
            .urls
            .iter()
            .map(|url| {
                let host = Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();
                WebSource::new("", url.clone(), host)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_and_list_inputs() {
        let from_string = parse_url_input(&json!(
            "https://a.test/1, https://b.test/2\nnot-a-url https://a.test/1 ftp://c.test/x"
        ));
        assert_eq!(from_string, vec!["https://a.test/1", "https://b.test/2"]);

        let from_list = parse_url_input(&json!(["https://a.test/1", 3, "https://c.test/3"]));
        assert_eq!(from_list, vec!["https://a.test/1", "https://c.test/3"]);

        assert!(parse_url_input(&json!(null)).is_empty());
    }

    #[tokio::test]
    async fn test_url_feed_yields_unresolved_sources() {
        let feed = UrlListFeed::new(vec!["https://example.test/article".to_string()]);
        let sources = feed.fetch().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source, "example.test");
        assert!(!sources[0].is_resolved());
    }
}
