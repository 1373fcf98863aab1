//! Link resolution: fetch a page, get past consent walls, extract readable
//! text and metadata, clean it with an LLM, and check it is a real article.

#[cfg(feature = "browser")]
mod browser;
mod consent;
mod fetcher;
mod html;
mod images;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
pub use consent::{consent_click_script, is_blocked_url, is_cloudflare_challenge, CONSENT_PROVIDERS};
#[cfg(test)]
pub use fetcher::testing::StaticFetcher;
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use html::{extract_page, ExtractedPage, ImageRef};
pub use images::{fetch_and_embed, to_jpeg_data_uri, MAX_IMAGE_SIDE};

use crate::config::{BrowserSettings, Prompts};
use crate::error::{PanelistError, Result};
use crate::llm::{Chain, LlmClient, ModelKind, DEFAULT_PARSE_RETRIES};
use crate::models::WebSource;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Extracted text longer than this is cut before it reaches the formatter.
const MAX_CONTENT_CHARS: usize = 60_000;

const TITLE_KEYS: &[&str] = &["og:title", "twitter:title", "headline"];
const DESCRIPTION_KEYS: &[&str] = &["og:description", "twitter:description", "description"];
const IMAGE_KEYS: &[&str] = &["og:image", "og:image:url", "twitter:image", "image"];
const DATE_KEYS: &[&str] = &[
    "article:published_time",
    "datepublished",
    "og:published_time",
    "pubdate",
    "publishdate",
    "date",
    "dc.date",
];
const LANGUAGE_KEYS: &[&str] = &["og:locale", "html_lang", "content-language", "language"];
const CATEGORY_KEYS: &[&str] = &["article:section", "article:tag", "news_keywords", "keywords"];

/// An article image after optional embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImage {
    pub index: usize,
    pub src: String,
    pub title: String,
    pub alt: String,
    /// JPEG data URI when image fetching is enabled and succeeded.
    pub data_uri: Option<String>,
}

/// Everything learned about a URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlResult {
    pub resolved_url: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
    pub language: Option<String>,
    pub metadata: HashMap<String, String>,
    pub human_readable_content: String,
    pub images: Vec<ResolvedImage>,
}

#[derive(Debug, Deserialize)]
struct Validation {
    is_valid: bool,
    #[serde(default)]
    reason: String,
}

/// Parse the date formats commonly found in article metadata.
pub fn parse_meta_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn split_categories(page: &ExtractedPage) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    for key in CATEGORY_KEYS {
        if let Some(value) = page.metadata.get(*key) {
            for item in value.split(',') {
                let item = item.trim();
                if !item.is_empty() && !categories.iter().any(|c| c.eq_ignore_ascii_case(item)) {
                    categories.push(item.to_string());
                }
            }
        }
    }
    categories
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pick the fetcher for the configured browser settings. Falls back to HTTP
/// when the browser is disabled or the crate is built without it.
pub fn fetcher_from_settings(settings: &BrowserSettings, http: reqwest::Client) -> Arc<dyn PageFetcher> {
    #[cfg(feature = "browser")]
    if settings.enabled {
        return Arc::new(BrowserFetcher::new(settings.clone()));
    }
    #[cfg(not(feature = "browser"))]
    if settings.enabled {
        warn!("Built without browser support, fetching pages over HTTP");
    }
    Arc::new(HttpFetcher::new(http))
}

/// Resolves URLs into validated, readable articles. One instance serves calls
/// serially; run several in parallel tasks for concurrency.
pub struct LinkResolver {
    fetcher: Arc<dyn PageFetcher>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    http: reqwest::Client,
    fetch_images: bool,
    parse_retries: u32,
}

impl LinkResolver {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<Prompts>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            fetcher,
            llm,
            prompts,
            http,
            fetch_images: false,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_images(mut self, fetch_images: bool) -> Self {
        self.fetch_images = fetch_images;
        self
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    /// Fetch, extract, format and validate one URL.
    #[instrument(skip(self, title, description))]
    pub async fn resolve(
        &self,
        url: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<UrlResult> {
        let page = self.fetcher.fetch(url).await?;
        debug!("Fetched {} ({} bytes) from {}", page.url, page.html.len(), url);
        let extracted = extract_page(&page.html, &page.url);
        if extracted.text.trim().is_empty() {
            return Err(PanelistError::Resolve(format!("No readable text at {}", url)));
        }

        let title = title
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .or_else(|| extracted.meta(TITLE_KEYS))
            .unwrap_or_else(|| extracted.title.clone());
        let description = description
            .filter(|d| !d.trim().is_empty())
            .map(str::to_string)
            .or_else(|| extracted.meta(DESCRIPTION_KEYS));

        let content = self
            .format(&title, truncate_chars(&extracted.text, MAX_CONTENT_CHARS))
            .await?;
        self.validate(url, &title, description.as_deref(), &content)
            .await?;

        let images = self.images(&extracted).await;
        let image = extracted
            .meta(IMAGE_KEYS)
            .or_else(|| extracted.images.first().map(|i| i.src.clone()));

        info!("Resolved {} ({} chars)", url, content.len());
        Ok(UrlResult {
            resolved_url: page.url,
            title,
            description,
            image,
            publish_date: extracted.meta(DATE_KEYS).as_deref().and_then(parse_meta_date),
            categories: split_categories(&extracted),
            language: extracted.meta(LANGUAGE_KEYS),
            metadata: extracted.metadata,
            human_readable_content: content,
            images,
        })
    }

    async fn format(&self, title: &str, text: &str) -> Result<String> {
        let vars = HashMap::from([
            ("title".to_string(), title.to_string()),
            ("content".to_string(), text.to_string()),
        ]);
        let chain = Chain::from_prompts(
            "formatter",
            self.llm.clone(),
            &self.prompts,
            &self.prompts.formatter,
            &vars,
        )
        .with_kind(ModelKind::Long)
        .with_temperature(0.0);
        Ok(chain.invoke_text().await?.trim().to_string())
    }

    async fn validate(
        &self,
        url: &str,
        title: &str,
        description: Option<&str>,
        content: &str,
    ) -> Result<()> {
        let vars = HashMap::from([
            ("title".to_string(), title.to_string()),
            ("description".to_string(), description.unwrap_or_default().to_string()),
            ("content".to_string(), truncate_chars(content, MAX_CONTENT_CHARS / 4).to_string()),
        ]);
        let verdict: Validation = Chain::from_prompts(
            "validator",
            self.llm.clone(),
            &self.prompts,
            &self.prompts.validator,
            &vars,
        )
        .json()
        .with_temperature(0.0)
        .with_parse_retries(self.parse_retries)
        .invoke_json()
        .await?;
        if !verdict.is_valid {
            return Err(PanelistError::Resolve(format!(
                "{} is not a valid article: {}",
                url, verdict.reason
            )));
        }
        Ok(())
    }

    async fn images(&self, page: &ExtractedPage) -> Vec<ResolvedImage> {
        let mut resolved = Vec::with_capacity(page.images.len());
        for image in &page.images {
            let data_uri = if self.fetch_images {
                match fetch_and_embed(&self.http, &image.src).await {
                    Ok(uri) => Some(uri),
                    Err(e) => {
                        debug!("Skipping image {}: {}", image.src, e);
                        None
                    }
                }
            } else {
                None
            };
            resolved.push(ResolvedImage {
                index: image.index,
                src: image.src.clone(),
                title: image.title.clone(),
                alt: image.alt.clone(),
                data_uri,
            });
        }
        resolved
    }

    /// Resolve a source in place. On failure the source is marked failed and
    /// the error returned.
    pub async fn resolve_source(&self, source: &mut WebSource) -> Result<()> {
        let result = self
            .resolve(
                &source.original_url,
                Some(source.title.as_str()),
                source.description.as_deref(),
            )
            .await;
        match result {
            Ok(result) => {
                apply_result(source, result);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to resolve {}: {}", source.original_url, e);
                source.mark_failed();
                Err(e)
            }
        }
    }
}

/// Copy what the resolver learned onto a source, keeping feed-provided values.
pub fn apply_result(source: &mut WebSource, result: UrlResult) {
    if source.title.trim().is_empty() {
        source.title = result.title;
    }
    if source.description.is_none() {
        source.description = result.description;
    }
    if source.image.is_none() {
        source.image = result.image;
    }
    if source.publish_date.is_none() {
        source.publish_date = result.publish_date;
    }
    if source.language.is_none() {
        source.language = result.language;
    }
    for category in result.categories {
        if !source.categories.contains(&category) {
            source.categories.push(category);
        }
    }
    for (key, value) in result.metadata {
        source.metadata.entry(key).or_insert(value);
    }
    source.resolved_url = Some(result.resolved_url);
    source.mark_resolved(result.human_readable_content);
}
