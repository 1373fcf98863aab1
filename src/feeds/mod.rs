//! News feed adapters.
//!
//! Each adapter fetches one feed endpoint and normalizes its entries into
//! unresolved [`WebSource`]s. A failing feed is logged and skipped so one broken
//! endpoint never aborts a multi-feed request.

mod google_news;
mod hackernews;
mod rss;
mod techcrunch;
mod url_list;
mod yle;

pub use google_news::{GoogleNewsConfig, GoogleNewsFeed};
pub use hackernews::{HackerNewsConfig, HackerNewsFeed, HackerNewsList};
pub use rss::{html_to_text, parse_feed, sibling_links};
pub use techcrunch::{TechCrunchConfig, TechCrunchFeed};
pub use url_list::{parse_url_input, UrlListFeed};
pub use yle::{YleConfig, YleFeed, YleFeedType};

use crate::error::{PanelistError, Result};
use crate::models::WebSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Default number of entries taken from one feed.
pub const DEFAULT_ARTICLES: usize = 10;

pub(crate) fn default_articles() -> usize {
    DEFAULT_ARTICLES
}

/// Feed configurations carried by a generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfigs {
    pub google_news: Vec<GoogleNewsConfig>,
    pub yle_news: Vec<YleConfig>,
    pub techcrunch_news: Vec<TechCrunchConfig>,
    pub hackernews: Vec<HackerNewsConfig>,
}

impl FeedConfigs {
    pub fn is_empty(&self) -> bool {
        self.google_news.is_empty()
            && self.yle_news.is_empty()
            && self.techcrunch_news.is_empty()
            && self.hackernews.is_empty()
    }

    /// Instantiate one adapter per configured feed.
    pub fn adapters(&self, http: &reqwest::Client) -> Vec<Box<dyn FeedAdapter>> {
        let mut adapters: Vec<Box<dyn FeedAdapter>> = Vec::new();
        for config in &self.google_news {
            adapters.push(Box::new(GoogleNewsFeed::new(config.clone(), http.clone())));
        }
        for config in &self.yle_news {
            adapters.push(Box::new(YleFeed::new(config.clone(), http.clone())));
        }
        for config in &self.techcrunch_news {
            adapters.push(Box::new(TechCrunchFeed::new(config.clone(), http.clone())));
        }
        for config in &self.hackernews {
            adapters.push(Box::new(HackerNewsFeed::new(config.clone(), http.clone())));
        }
        adapters
    }
}

/// Trait for news feed adapters.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Human-readable feed name for logs.
    fn name(&self) -> String;

    /// Fetch and normalize the feed.
    async fn fetch(&self) -> Result<Vec<WebSource>>;
}

/// Fetch every adapter, skipping the ones that fail.
pub async fn fetch_all(adapters: &[Box<dyn FeedAdapter>]) -> Vec<WebSource> {
    let results = futures::future::join_all(adapters.iter().map(|a| a.fetch())).await;
    let mut sources = Vec::new();
    for (adapter, result) in adapters.iter().zip(results) {
        match result {
            Ok(items) => {
                info!("Feed {}: {} items", adapter.name(), items.len());
                sources.extend(items);
            }
            Err(e) => warn!("Feed {} failed, skipping: {}", adapter.name(), e),
        }
    }
    sources
}

/// HTTP client for feed endpoints.
pub fn feed_http_client(user_agent: &str) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(30))
        .build()?)
}

pub(crate) async fn get_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PanelistError::Feed(format!("{} returned {}", url, status)));
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<&'static str>);
    struct Broken;

    #[async_trait]
    impl FeedAdapter for Fixed {
        fn name(&self) -> String {
            "fixed".to_string()
        }

        async fn fetch(&self) -> Result<Vec<WebSource>> {
            Ok(self.0.iter().map(|u| WebSource::new(*u, *u, "fixed")).collect())
        }
    }

    #[async_trait]
    impl FeedAdapter for Broken {
        fn name(&self) -> String {
            "broken".to_string()
        }

        async fn fetch(&self) -> Result<Vec<WebSource>> {
            Err(PanelistError::Feed("503".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failing_feed_is_skipped() {
        let adapters: Vec<Box<dyn FeedAdapter>> = vec![
            Box::new(Fixed(vec!["https://a.test/1"])),
            Box::new(Broken),
            Box::new(Fixed(vec!["https://b.test/2", "https://b.test/3"])),
        ];
        let sources = fetch_all(&adapters).await;
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].original_url, "https://a.test/1");
    }

    #[test]
    fn test_request_feed_configs_deserialize() {
        let json = r#"{
            "google_news": [{"query": "fusion energy", "language": "en", "country": "US"}],
            "hackernews": [{"list": "best", "articles": 5}]
        }"#;
        let configs: FeedConfigs = serde_json::from_str(json).unwrap();
        assert!(!configs.is_empty());
        assert_eq!(configs.google_news[0].articles, DEFAULT_ARTICLES);
        assert_eq!(configs.hackernews[0].list, HackerNewsList::Best);

        let http = reqwest::Client::new();
        assert_eq!(configs.adapters(&http).len(), 2);
        assert!(FeedConfigs::default().is_empty());
    }
}
