//! Topical groups of web sources.

use super::{NewsArticle, WebSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A topical group of web sources, produced by the grouping engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSourceCollection {
    pub id: Uuid,
    pub title: String,
    pub topic: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Cap on how many children are handed to the writer.
    pub max_amount: usize,
    /// Whether this is the episode's most important story.
    #[serde(default)]
    pub main_item: bool,
    pub image: Option<String>,
    #[serde(default)]
    pub web_sources: Vec<WebSource>,
    pub article: Option<NewsArticle>,
}

impl WebSourceCollection {
    pub fn new(title: impl Into<String>, max_amount: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            topic: None,
            categories: Vec::new(),
            max_amount,
            main_item: false,
            image: None,
            web_sources: Vec::new(),
            article: None,
        }
    }

    /// Add a child unless one with the same sorting id is already present.
    pub fn push(&mut self, source: WebSource) -> bool {
        let id = source.sorting_id();
        if self.web_sources.iter().any(|s| s.sorting_id() == id) {
            return false;
        }
        self.web_sources.push(source);
        true
    }

    /// Drop duplicate children, keeping the first occurrence.
    pub fn filter_duplicates(&mut self) {
        let mut seen = HashSet::new();
        self.web_sources.retain(|s| seen.insert(s.sorting_id()));
    }

    /// Sort children newest first. Undated children go last; ties keep their order.
    pub fn sort_newest_first(&mut self) {
        self.web_sources
            .sort_by(|a, b| match (a.publish_date, b.publish_date) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
    }

    /// Take the image of the first child that has a non-empty one.
    pub fn inherit_image(&mut self) {
        if self.image.is_some() {
            return;
        }
        self.image = self
            .web_sources
            .iter()
            .filter_map(|s| s.image.clone())
            .find(|i| !i.trim().is_empty());
    }

    /// Union of children categories, in first-seen order.
    pub fn collect_categories(&mut self) {
        for source in &self.web_sources {
            for category in &source.categories {
                if !self.categories.contains(category) {
                    self.categories.push(category.clone());
                }
            }
        }
    }

    /// Children passed on to writing, capped by `max_amount`.
    pub fn included(&self) -> &[WebSource] {
        let cap = if self.max_amount == 0 {
            self.web_sources.len()
        } else {
            self.max_amount.min(self.web_sources.len())
        };
        &self.web_sources[..cap]
    }

    /// Number of children that will be written about.
    pub fn article_count(&self) -> usize {
        self.included().len()
    }

    /// Concatenated source content for prompts.
    pub fn content(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        if let Some(article) = &self.article {
            out.push_str(&format!("\n{}\n", article.article));
        }
        for source in self.included() {
            out.push_str("\n---\n");
            out.push_str(&source.prompt_block());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn source(url: &str) -> WebSource {
        WebSource::new(url, url, "test")
    }

    #[test]
    fn test_push_rejects_duplicates() {
        let mut collection = WebSourceCollection::new("Group", 5);
        assert!(collection.push(source("https://a.test")));
        assert!(!collection.push(source("https://a.test")));
        assert_eq!(collection.web_sources.len(), 1);
    }

    #[test]
    fn test_filter_duplicates() {
        let mut collection = WebSourceCollection::new("Group", 5);
        collection.web_sources = vec![source("https://a.test"), source("https://b.test"), source("https://a.test")];
        collection.filter_duplicates();
        assert_eq!(collection.web_sources.len(), 2);
    }

    #[test]
    fn test_sort_and_inherit_image() {
        let now = Utc::now();
        let mut old = source("https://old.test");
        old.publish_date = Some(now - Duration::days(2));
        old.image = Some("old.jpg".to_string());
        let mut new = source("https://new.test");
        new.publish_date = Some(now);
        new.image = Some(String::new());
        let undated = source("https://undated.test");

        let mut collection = WebSourceCollection::new("Group", 5);
        collection.web_sources = vec![undated, old, new];
        collection.sort_newest_first();
        collection.inherit_image();

        assert_eq!(collection.web_sources[0].original_url, "https://new.test");
        assert_eq!(collection.web_sources[2].original_url, "https://undated.test");
        assert_eq!(collection.image.as_deref(), Some("old.jpg"));
    }

    #[test]
    fn test_included_respects_cap() {
        let mut collection = WebSourceCollection::new("Group", 2);
        for i in 0..4 {
            collection.push(source(&format!("https://{}.test", i)));
        }
        assert_eq!(collection.included().len(), 2);
        collection.max_amount = 0;
        assert_eq!(collection.included().len(), 4);
    }
}
