//! Google News RSS (search, topic headlines, or top stories).

use super::rss::parse_feed;
use super::{default_articles, get_bytes, FeedAdapter};
use crate::error::Result;
use crate::models::WebSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

const BASE: &str = "https://news.google.com/rss";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleNewsConfig {
    /// Free-text search. Takes precedence over `topic`.
    pub query: Option<String>,
    /// Section topic, e.g. TECHNOLOGY, BUSINESS, SCIENCE.
    pub topic: Option<String>,
    pub language: String,
    pub country: String,
    /// Search recency window, e.g. "1d" or "12h".
    pub since: Option<String>,
    pub articles: usize,
}

impl Default for GoogleNewsConfig {
    fn default() -> Self {
        Self {
            query: None,
            topic: None,
            language: "en".to_string(),
            country: "US".to_string(),
            since: Some("1d".to_string()),
            articles: default_articles(),
        }
    }
}

impl GoogleNewsConfig {
    /// The RSS endpoint for this configuration.
    pub fn feed_url(&self) -> Result<Url> {
        let mut url = match (&self.query, &self.topic) {
            (Some(query), _) => {
                let mut url = Url::parse(&format!("{}/search", BASE))?;
                let q = match &self.since {
                    Some(since) => format!("{} when:{}", query, since),
                    None => query.clone(),
                };
                url.query_pairs_mut().append_pair("q", &q);
                url
            }
            (None, Some(topic)) => Url::parse(&format!(
                "{}/headlines/section/topic/{}",
                BASE,
                topic.to_uppercase()
            ))?,
            (None, None) => Url::parse(BASE)?,
        };
        url.query_pairs_mut()
            .append_pair("hl", &self.language)
            .append_pair("gl", &self.country)
            .append_pair("ceid", &format!("{}:{}", self.country, self.language));
        Ok(url)
    }
}

pub struct GoogleNewsFeed {
    config: GoogleNewsConfig,
    http: reqwest::Client,
}

impl GoogleNewsFeed {
    pub fn new(config: GoogleNewsConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

/// Google appends " - Publisher" to every headline.
fn split_publisher(source: &mut WebSource) {
    if let Some((title, publisher)) = source.title.rsplit_once(" - ") {
        if !publisher.trim().is_empty() {
            source.source = publisher.trim().to_string();
            source.title = title.trim().to_string();
        }
    }
}

#[async_trait]
impl FeedAdapter for GoogleNewsFeed {
    fn name(&self) -> String {
        match (&self.config.query, &self.config.topic) {
            (Some(q), _) => format!("google_news:search:{}", q),
            (None, Some(t)) => format!("google_news:topic:{}", t),
            _ => "google_news".to_string(),
        }
    }

    async fn fetch(&self) -> Result<Vec<WebSource>> {
        let url = self.config.feed_url()?;
        let bytes = get_bytes(&self.http, url.as_str()).await?;
        let mut sources = parse_feed(&bytes, "Google News", self.config.articles)?;
        for source in &mut sources {
            split_publisher(source);
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url() {
        let config = GoogleNewsConfig {
            query: Some("fusion energy".to_string()),
            language: "fi".to_string(),
            country: "FI".to_string(),
            ..Default::default()
        };
        let url = config.feed_url().unwrap();
        assert_eq!(url.path(), "/rss/search");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_string(), "fusion energy when:1d".to_string())));
        assert!(pairs.contains(&("ceid".to_string(), "FI:fi".to_string())));
    }

    #[test]
    fn test_topic_url() {
        let config = GoogleNewsConfig {
            topic: Some("technology".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.feed_url().unwrap().path(),
            "/rss/headlines/section/topic/TECHNOLOGY"
        );
    }

    #[test]
    fn test_publisher_split() {
        let mut source = WebSource::new("Rocket lands - Space - Daily Planet", "https://x.test", "Google News");
        split_publisher(&mut source);
        assert_eq!(source.title, "Rocket lands - Space");
        assert_eq!(source.source, "Daily Planet");
    }
}
