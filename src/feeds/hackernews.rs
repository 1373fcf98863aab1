//! Hacker News via the Firebase JSON API.

use super::rss::html_to_text;
use super::{default_articles, FeedAdapter};
use crate::error::{PanelistError, Result};
use crate::models::WebSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

const API: &str = "https://hacker-news.firebaseio.com/v0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HackerNewsList {
    #[default]
    Top,
    New,
    Best,
}

impl HackerNewsList {
    fn endpoint(&self) -> &'static str {
        match self {
            HackerNewsList::Top => "topstories",
            HackerNewsList::New => "newstories",
            HackerNewsList::Best => "beststories",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HackerNewsConfig {
    pub list: HackerNewsList,
    pub articles: usize,
    /// Skip stories below this score.
    pub min_score: u32,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            list: HackerNewsList::Top,
            articles: default_articles(),
            min_score: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(default)]
    title: String,
    url: Option<String>,
    text: Option<String>,
    time: Option<i64>,
    #[serde(default)]
    score: u32,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

fn item_to_source(item: HnItem) -> Option<WebSource> {
    if item.dead || item.deleted || item.kind != "story" || item.title.is_empty() {
        return None;
    }
    let discussion = format!("https://news.ycombinator.com/item?id={}", item.id);
    let url = item.url.clone().unwrap_or_else(|| discussion.clone());
    let mut source = WebSource::new(item.title, url, "Hacker News");
    source.publish_date = item
        .time
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
    source.description = item.text.as_deref().map(html_to_text).filter(|t| !t.is_empty());
    source
        .metadata
        .insert("hn_score".to_string(), item.score.to_string());
    source.metadata.insert("hn_discussion".to_string(), discussion);
    source.categories = vec!["Technology".to_string()];
    Some(source)
}

pub struct HackerNewsFeed {
    config: HackerNewsConfig,
    http: reqwest::Client,
}

impl HackerNewsFeed {
    pub fn new(config: HackerNewsConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    async fn item(&self, id: u64) -> Result<HnItem> {
        let url = format!("{}/item/{}.json", API, id);
        Ok(self.http.get(&url).send().await?.json().await?)
    }
}

#[async_trait]
impl FeedAdapter for HackerNewsFeed {
    fn name(&self) -> String {
        format!("hackernews:{}", self.config.list.endpoint())
    }

    async fn fetch(&self) -> Result<Vec<WebSource>> {
        let url = format!("{}/{}.json", API, self.config.list.endpoint());
        let ids: Vec<u64> = self.http.get(&url).send().await?.json().await?;
        if ids.is_empty() {
            return Err(PanelistError::Feed("Hacker News returned no stories".to_string()));
        }

        // Over-fetch a little so filtered items don't leave the list short.
        let wanted = self.config.articles;
        let items: Vec<Result<HnItem>> = stream::iter(ids.into_iter().take(wanted * 2))
            .map(|id| self.item(id))
            .buffered(8)
            .collect()
            .await;

        let mut sources = Vec::new();
        for item in items {
            match item {
                Ok(item) if item.score >= self.config.min_score => {
                    if let Some(source) = item_to_source(item) {
                        sources.push(source);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping Hacker News item: {}", e),
            }
            if sources.len() >= wanted {
                break;
            }
        }
        Ok(sources)
    }
}
