//! TechCrunch RSS, optionally per category.

use super::rss::parse_feed;
use super::{default_articles, get_bytes, FeedAdapter};
use crate::error::Result;
use crate::models::WebSource;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechCrunchConfig {
    /// Category slugs such as "ai" or "startups". Empty means the main feed.
    pub categories: Vec<String>,
    pub articles: usize,
}

impl Default for TechCrunchConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            articles: default_articles(),
        }
    }
}

impl TechCrunchConfig {
    pub fn feed_urls(&self) -> Vec<String> {
        if self.categories.is_empty() {
            return vec!["https://techcrunch.com/feed/".to_string()];
        }
        self.categories
            .iter()
            .map(|c| format!("https://techcrunch.com/category/{}/feed/", c.trim().to_lowercase()))
            .collect()
    }
}

pub struct TechCrunchFeed {
    config: TechCrunchConfig,
    http: reqwest::Client,
}

impl TechCrunchFeed {
    pub fn new(config: TechCrunchConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl FeedAdapter for TechCrunchFeed {
    fn name(&self) -> String {
        if self.config.categories.is_empty() {
            "techcrunch".to_string()
        } else {
            format!("techcrunch:{}", self.config.categories.join(","))
        }
    }

    async fn fetch(&self) -> Result<Vec<WebSource>> {
        let urls = self.config.feed_urls();
        let bodies = join_all(urls.iter().map(|u| get_bytes(&self.http, u))).await;

        let mut sources: Vec<WebSource> = Vec::new();
        let mut last_error = None;
        for (url, body) in urls.iter().zip(bodies) {
            match body.and_then(|b| parse_feed(&b, "TechCrunch", self.config.articles)) {
                Ok(items) => {
                    for item in items {
                        if !sources.iter().any(|s| s.original_url == item.original_url) {
                            sources.push(item);
                        }
                    }
                }
                Err(e) => {
                    warn!("TechCrunch feed {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        if sources.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        sources.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
        sources.truncate(self.config.articles);
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_urls() {
        assert_eq!(
            TechCrunchConfig::default().feed_urls(),
            vec!["https://techcrunch.com/feed/".to_string()]
        );
        let config = TechCrunchConfig {
            categories: vec!["AI".to_string(), "startups".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.feed_urls(),
            vec![
                "https://techcrunch.com/category/ai/feed/".to_string(),
                "https://techcrunch.com/category/startups/feed/".to_string()
            ]
        );
    }
}
