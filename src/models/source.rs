//! Web sources and their LLM-cleaned article form.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

/// Hex-encoded md5 of a string.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Resolution state of a web source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolveState {
    #[default]
    Unresolved,
    Resolved,
    Failed,
}

impl std::fmt::Display for ResolveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveState::Unresolved => write!(f, "unresolved"),
            ResolveState::Resolved => write!(f, "resolved"),
            ResolveState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ResolveState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unresolved" => Ok(ResolveState::Unresolved),
            "resolved" => Ok(ResolveState::Resolved),
            "failed" => Ok(ResolveState::Failed),
            _ => Err(format!("Unknown resolve state: {}", s)),
        }
    }
}

/// LLM-rewritten clean form of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsArticle {
    pub title: String,
    pub topic: String,
    pub description: String,
    pub summary: String,
    pub article: String,
    pub language: String,
    pub image: Option<String>,
    pub categories: Vec<String>,
}

/// One web article, as pulled from a feed and later resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSource {
    /// Stable row id.
    pub id: Uuid,
    pub title: String,
    pub original_url: String,
    pub resolved_url: Option<String>,
    /// Publisher label.
    pub source: String,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub image: Option<String>,
    /// Cleaned readable text.
    pub original_content: Option<String>,
    pub article: Option<NewsArticle>,
    #[serde(default)]
    pub resolve_state: ResolveState,
    /// URLs of the same story at other outlets.
    #[serde(default)]
    pub linked_items: Vec<String>,
    /// Page metadata harvested during resolution.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl WebSource {
    /// Create an unresolved source for a URL.
    pub fn new(title: impl Into<String>, original_url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            original_url: original_url.into(),
            resolved_url: None,
            source: source.into(),
            description: None,
            language: None,
            categories: Vec::new(),
            publish_date: None,
            image: None,
            original_content: None,
            article: None,
            resolve_state: ResolveState::Unresolved,
            linked_items: Vec::new(),
            metadata: HashMap::new(),
            owner_id: None,
            organization_id: None,
            is_public: false,
        }
    }

    /// Create an already-resolved source from user-supplied text.
    pub fn from_text(title: impl Into<String>, text: &str) -> Self {
        let url = format!("text://{}", md5_hex(text));
        let mut source = Self::new(title, url, "user input");
        source.mark_resolved(text.to_string());
        source
    }

    /// Opaque short handle used in prompts: md5 of the original URL.
    pub fn sorting_id(&self) -> String {
        md5_hex(&self.original_url)
    }

    /// First segment of the row id.
    pub fn short_id(&self) -> String {
        self.id
            .to_string()
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Short hash of the title, used as a summary reference handle.
    pub fn title_hash(&self) -> String {
        md5_hex(&self.title)[..8].to_string()
    }

    /// sha256 over the article JSON, the cleaned content, or the title.
    pub fn content_hash(&self) -> String {
        let basis = match (&self.article, &self.original_content) {
            (Some(article), _) => serde_json::to_string(article).unwrap_or_default(),
            (None, Some(content)) if !content.is_empty() => content.clone(),
            _ => self.title.clone(),
        };
        hex::encode(Sha256::digest(basis.as_bytes()))
    }

    /// Mark as resolved. Empty content marks the source failed instead.
    pub fn mark_resolved(&mut self, content: String) {
        if content.trim().is_empty() {
            self.mark_failed();
            return;
        }
        self.original_content = Some(content);
        self.resolve_state = ResolveState::Resolved;
    }

    pub fn mark_failed(&mut self) {
        self.resolve_state = ResolveState::Failed;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolve_state == ResolveState::Resolved
            && self
                .original_content
                .as_ref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Best available body text for prompts.
    pub fn body(&self) -> &str {
        if let Some(article) = &self.article {
            if !article.article.is_empty() {
                return &article.article;
            }
        }
        self.original_content
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or(&self.title)
    }

    /// Content block used by the segment writer.
    pub fn prompt_block(&self) -> String {
        let mut block = format!("Title: {}\nSource: {}\n", self.title, self.source);
        if let Some(date) = self.publish_date {
            block.push_str(&format!("Published: {}\n", date.format("%Y-%m-%d")));
        }
        block.push_str(&format!("URL: {}\n\n{}", self.original_url, self.body()));
        block
    }
}
