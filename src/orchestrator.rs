//! Pipeline orchestrator for Panelist.
//!
//! Runs one generation request end to end: collect and resolve sources, group
//! them, write segments in parallel, combine, summarize, upload, translate and
//! hand finished transcripts to the audio stage.

use crate::combiner::{CombineRequest, Combiner};
use crate::config::{ConversationConfig, Prompts, Settings};
use crate::error::{PanelistError, Result};
use crate::feeds::{feed_http_client, fetch_all, parse_url_input, FeedAdapter, FeedConfigs, UrlListFeed};
use crate::grouping::{GroupingEngine, GroupingOptions};
use crate::llm::{ClientPool, LlmClient};
use crate::models::{
    PanelAudio, PanelDiscussion, PanelTranscript, ProcessState, TranscriptSummary, WebSource,
    WebSourceCollection,
};
use crate::repair::{RepairLoop, RepairRequest};
use crate::resolver::{fetcher_from_settings, LinkResolver, PageFetcher};
use crate::store::{BlobStore, LocalBlobStore, PanelStore, RelationKind, SourceStore, SqliteStore};
use crate::summarizer::{fallback_summary, Summarizer};
use crate::tasks::TaskGroup;
use crate::transcript::Transcript;
use crate::translator::{same_language, TranslateRequest, Translator};
use crate::writer::{SegmentRequest, SegmentWriter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// File name of the first version of a transcript.
pub const TRANSCRIPT_FILE: &str = "transcript.xml";

/// One generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub panel_id: String,
    pub transcript_parent_id: Option<Uuid>,
    /// URLs as one string or a list.
    pub input_source: Option<Value>,
    pub input_text: Option<String>,
    #[serde(flatten)]
    pub feeds: FeedConfigs,
    pub news_guidance: Option<String>,
    /// Cap on resolved sources.
    pub news_items: Option<usize>,
    /// Minimum number of segments.
    pub segments: Option<usize>,
    /// Extra languages to translate into.
    pub languages: Vec<String>,
    pub tts_model: Option<String>,
    pub bucket_name: Option<String>,
    pub longform: Option<bool>,
    pub cronjob: Option<String>,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub is_public: bool,
    pub conversation_config: Option<Value>,
}

impl GenerationRequest {
    /// Whether the request names any source at all.
    pub fn has_inputs(&self) -> bool {
        !self.feeds.is_empty()
            || self.input_source.as_ref().is_some_and(|v| !parse_url_input(v).is_empty())
            || self.input_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// What a finished generation produced.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub transcript: PanelTranscript,
    pub text: Transcript,
    pub translations: Vec<PanelTranscript>,
}

/// Directory of a transcript's blobs.
pub fn transcript_dir(row: &PanelTranscript) -> String {
    format!(
        "{}/{}_{}_{}",
        row.panel_id,
        row.created_at.format("%Y-%m-%d"),
        row.language,
        row.id
    )
}

/// Upload `content` for `row`. Content identical to a blob already in the
/// row's history is not uploaded again; the row is pointed at that blob.
/// Replacing an existing file writes `transcript_v{n}.xml` and moves the old
/// path into the history. Returns the key now in `row.file`.
pub async fn store_transcript(blobs: &dyn BlobStore, row: &mut PanelTranscript, content: &str) -> Result<String> {
    let bytes = content.as_bytes();
    let mut known: Vec<String> = row.file.iter().cloned().collect();
    known.extend(row.metadata.transcript_history.iter().rev().cloned());

    for key in known {
        if blobs.get(&row.bucket, &key).await?.as_deref() == Some(bytes) {
            if row.file.as_deref() != Some(key.as_str()) {
                if let Some(previous) = row.file.take() {
                    row.metadata.transcript_history.push(previous);
                }
                row.metadata.transcript_history.retain(|old| old != &key);
                debug!("Transcript content unchanged, repointing to {}", key);
                row.file = Some(key.clone());
            }
            return Ok(key);
        }
    }

    let dir = transcript_dir(row);
    let key = match row.file.take() {
        None => format!("{}/{}", dir, TRANSCRIPT_FILE),
        Some(previous) => {
            row.metadata.transcript_history.push(previous);
            format!("{}/transcript_v{}.xml", dir, row.metadata.transcript_history.len() + 1)
        }
    };
    blobs.put(&row.bucket, &key, bytes).await?;
    info!("Uploaded transcript to {}/{}", row.bucket, key);
    row.file = Some(key.clone());
    Ok(key)
}

/// Per-segment word targets. The main collection gets double weight.
pub fn segment_targets(collections: &[WebSourceCollection], total: Option<usize>) -> Vec<Option<usize>> {
    let Some(total) = total else {
        return vec![None; collections.len()];
    };
    let weights: Vec<usize> = collections.iter().map(|c| if c.main_item { 2 } else { 1 }).collect();
    let sum = weights.iter().sum::<usize>().max(1);
    weights.iter().map(|w| Some((total * w / sum).max(1))).collect()
}

/// Prior-episode context from completed transcripts, newest first.
pub fn previous_episodes_text(rows: &[PanelTranscript]) -> String {
    rows.iter()
        .filter_map(|row| {
            let title = row.title.as_deref()?;
            let mut entry = format!("- {} ({})", title, row.created_at.format("%Y-%m-%d"));
            if let Some(description) = row.metadata.description.as_deref().filter(|d| !d.is_empty()) {
                entry.push_str(&format!(": {}", description));
            }
            let subjects: Vec<&str> = row.metadata.subjects.iter().map(|s| s.title.as_str()).collect();
            if !subjects.is_empty() {
                entry.push_str(&format!("\n  Subjects: {}", subjects.join("; ")));
            }
            Some(entry)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replaceable parts of an orchestrator.
pub struct Components {
    pub llm: Arc<dyn LlmClient>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub sources: Arc<dyn SourceStore>,
    pub panels: Arc<dyn PanelStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub http: reqwest::Client,
}

/// The main orchestrator for the Panelist pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<Settings>,
    prompts: Arc<Prompts>,
    llm: Arc<dyn LlmClient>,
    fetcher: Arc<dyn PageFetcher>,
    sources: Arc<dyn SourceStore>,
    panels: Arc<dyn PanelStore>,
    blobs: Arc<dyn BlobStore>,
    http: reqwest::Client,
}

impl Orchestrator {
    /// Build from settings: pooled LLM clients, SQLite rows, local blobs.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let http = feed_http_client(&settings.browser.user_agent)?;
        let sqlite_path = settings.sqlite_path();
        if let Some(parent) = sqlite_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteStore::new(&sqlite_path)?);
        let components = Components {
            llm: Arc::new(ClientPool::new(settings.llm.clone())),
            fetcher: fetcher_from_settings(&settings.browser, http.clone()),
            sources: store.clone(),
            panels: store,
            blobs: Arc::new(LocalBlobStore::new(settings.blob_dir())),
            http,
        };
        Ok(Self::with_components(settings, prompts, components))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, prompts: Prompts, components: Components) -> Self {
        Self {
            settings: Arc::new(settings),
            prompts: Arc::new(prompts),
            llm: components.llm,
            fetcher: components.fetcher,
            sources: components.sources,
            panels: components.panels,
            blobs: components.blobs,
            http: components.http,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn panels(&self) -> Arc<dyn PanelStore> {
        self.panels.clone()
    }

    pub fn source_store(&self) -> Arc<dyn SourceStore> {
        self.sources.clone()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn resolver(&self) -> LinkResolver {
        LinkResolver::new(self.fetcher.clone(), self.llm.clone(), self.prompts.clone(), self.http.clone())
            .with_images(self.settings.browser.fetch_images)
            .with_parse_retries(self.settings.llm.parse_retries)
    }

    fn repair_loop(&self) -> RepairLoop {
        let pipeline = &self.settings.pipeline;
        RepairLoop::new(self.llm.clone(), self.prompts.clone())
            .with_length_policy(pipeline.min_target_words, pipeline.length_tolerance)
            .with_parse_retries(self.settings.llm.parse_retries)
    }

    /// Resolve the effective conversation config for a panel and request.
    pub fn conversation_config(&self, panel: Option<&PanelDiscussion>, request: &GenerationRequest) -> Result<ConversationConfig> {
        let mut config = ConversationConfig::resolve(
            &self.settings.conversation,
            panel.map(|p| &p.metadata),
            request.conversation_config.as_ref(),
        )?;
        if let Some(longform) = request.longform {
            config.longform = longform;
        }
        Ok(config)
    }

    /// Run one generation request. The transcript row ends in `done` or, on
    /// any fatal error, in `failed` with the error text.
    #[instrument(skip_all, fields(panel = %request.panel_id))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        if request.panel_id.trim().is_empty() {
            return Err(PanelistError::InvalidInput("panel_id is required".to_string()));
        }
        let panel = match self.panels.get_panel(&request.panel_id).await? {
            Some(panel) => panel,
            None => {
                let mut panel = PanelDiscussion::new(&request.panel_id, &request.panel_id);
                panel.owner_id = request.owner_id.clone();
                panel.organization_id = request.organization_id.clone();
                self.panels.upsert_panel(&panel).await?;
                panel
            }
        };
        let config = self.conversation_config(Some(&panel), request)?;

        let bucket = request
            .bucket_name
            .clone()
            .unwrap_or_else(|| self.settings.storage.default_bucket.clone());
        let mut row = PanelTranscript::new(&request.panel_id, &config.output_language, bucket);
        row.transcript_parent_id = request.transcript_parent_id;
        row.generation_cronjob = request.cronjob.clone();
        row.owner_id = request.owner_id.clone();
        row.organization_id = request.organization_id.clone();
        row.metadata.request = Some(serde_json::to_value(request)?);
        row.metadata.conversation_config = Some(serde_json::to_value(&config)?);
        row.transition(ProcessState::Processing, None);
        self.panels.upsert_transcript(&row).await?;

        match self.produce(request, &config, &mut row).await {
            Ok((text, translations)) => Ok(GenerationOutcome {
                transcript: row,
                text,
                translations,
            }),
            Err(e) => {
                warn!("Generation {} failed: {}", row.id, e);
                row.transition(ProcessState::Failed, Some(e.to_string()));
                if let Err(store_error) = self.panels.upsert_transcript(&row).await {
                    warn!("Could not record failure of {}: {}", row.id, store_error);
                }
                Err(e)
            }
        }
    }

    async fn produce(
        &self,
        request: &GenerationRequest,
        config: &ConversationConfig,
        row: &mut PanelTranscript,
    ) -> Result<(Transcript, Vec<PanelTranscript>)> {
        let pipeline = &self.settings.pipeline;

        let history = self
            .panels
            .recent_done(&request.panel_id, &config.output_language, pipeline.history_episodes)
            .await?;
        let previous_episodes = previous_episodes_text(&history);

        let sources = self.collect_sources(request).await?;
        let sources = self.resolve_sources(sources, request.news_items.unwrap_or(pipeline.max_items)).await;
        if sources.is_empty() {
            return Err(PanelistError::InvalidInput("no sources".to_string()));
        }
        let sources = self.persist_sources(sources).await?;

        let grouping = GroupingEngine::new(self.llm.clone(), self.prompts.clone())
            .with_parse_retries(self.settings.llm.parse_retries);
        let options = GroupingOptions {
            guidance: request.news_guidance.clone().unwrap_or_default(),
            min_groups: request.segments.unwrap_or(pipeline.min_groups),
            max_ids_per_group: pipeline.max_ids_per_group,
            previous_episode: previous_episodes.lines().next().map(str::to_string),
        };
        let collections = grouping.group(sources, &options).await?;
        self.link_collections(&collections).await;

        row.title = collections.first().map(|c| c.title.clone());
        row.metadata.images = collections.iter().filter_map(|c| c.image.clone()).collect();
        // Provisional subjects, one per collection, until the summary replaces them.
        row.metadata.subjects = fallback_summary(&collections).subjects;
        self.panels.upsert_transcript(row).await?;

        let (segments, written) = self.write_segments(&collections, config, &previous_episodes).await?;

        let content = written.iter().map(|c| c.content()).collect::<Vec<_>>().join("\n\n");
        let combiner = Combiner::new(self.llm.clone(), self.prompts.clone())
            .with_repair(self.repair_loop())
            .with_parse_retries(self.settings.llm.parse_retries);
        let combined = tokio::time::timeout(
            Duration::from_secs(pipeline.combine_timeout_secs),
            combiner.combine(CombineRequest {
                segments: &segments,
                collections: &written,
                config,
                content: &content,
                previous_episodes: &previous_episodes,
                date: chrono::Utc::now().date_naive(),
                retries: pipeline.combined_retries,
            }),
        )
        .await
        .map_err(|_| PanelistError::Timeout("combining segments".to_string()))??;

        let summary = self.summarize(&combined, &written, config).await;
        row.title = Some(summary.title.clone()).filter(|t| !t.is_empty()).or(row.title.take());
        row.metadata.description = Some(summary.description.clone()).filter(|d| !d.is_empty());
        row.metadata.subjects = summary.subjects;

        store_transcript(self.blobs.as_ref(), row, &combined.render()).await?;
        row.transition(ProcessState::Done, None);
        self.panels.upsert_transcript(row).await?;
        self.hand_off(row, request.tts_model.clone()).await?;
        info!("Transcript {} done: {} words", row.id, combined.word_count());

        let article_count = written.iter().map(WebSourceCollection::article_count).sum();
        let translations = self
            .translate_all(row, &combined, request, config, &content, article_count, &previous_episodes)
            .await;
        Ok((combined, translations))
    }

    /// Feed items, free URLs and input text. Falls back to the configured
    /// default feeds when the request names no source at all.
    async fn collect_sources(&self, request: &GenerationRequest) -> Result<Vec<WebSource>> {
        let feeds = if request.has_inputs() {
            &request.feeds
        } else {
            &self.settings.feeds
        };
        let mut adapters: Vec<Box<dyn FeedAdapter>> = feeds.adapters(&self.http);
        if let Some(input) = &request.input_source {
            let urls = parse_url_input(input);
            if !urls.is_empty() {
                adapters.push(Box::new(UrlListFeed::new(urls)));
            }
        }
        let mut sources = fetch_all(&adapters).await;
        if let Some(text) = request.input_text.as_deref().filter(|t| !t.trim().is_empty()) {
            sources.push(WebSource::from_text("User input", text));
        }
        for source in &mut sources {
            source.owner_id = request.owner_id.clone();
            source.organization_id = request.organization_id.clone();
            source.is_public = request.is_public;
        }
        info!("Collected {} sources", sources.len());
        Ok(sources)
    }

    /// Resolve until `wanted` sources are ready. Sources already resolved in
    /// the store are reused. Failed sources are persisted as failed.
    async fn resolve_sources(&self, sources: Vec<WebSource>, wanted: usize) -> Vec<WebSource> {
        let mut ready = Vec::new();
        let mut pending = Vec::new();
        for source in sources {
            if source.is_resolved() {
                ready.push(source);
                continue;
            }
            match self.sources.load(&source.original_url).await {
                Ok(Some(stored)) if stored.is_resolved() => {
                    debug!("Reusing resolved source {}", stored.original_url);
                    ready.push(stored);
                }
                _ => pending.push(source),
            }
        }

        let wanted = wanted.max(1);
        if ready.len() < wanted && !pending.is_empty() {
            let mut group = TaskGroup::new("resolve", self.settings.pipeline.workers);
            for mut source in pending {
                let resolver = self.resolver();
                let store = self.sources.clone();
                group.spawn(async move {
                    match resolver.resolve_source(&mut source).await {
                        Ok(()) => Ok(source),
                        Err(e) => {
                            if let Err(store_error) = store.upsert(&source).await {
                                warn!("Could not persist failed source {}: {}", source.original_url, store_error);
                            }
                            Err(e)
                        }
                    }
                });
            }
            let needed = wanted - ready.len();
            let timeout = Duration::from_secs(self.settings.pipeline.ingest_timeout_secs);
            ready.extend(group.join_successes(needed, timeout).await.into_iter().map(|(_, s)| s));
        }
        ready.truncate(wanted);
        ready
    }

    /// Upsert sources, adopting stored ids, and record cross-outlet links.
    async fn persist_sources(&self, mut sources: Vec<WebSource>) -> Result<Vec<WebSource>> {
        for source in &mut sources {
            source.id = self.sources.upsert(source).await?;
        }
        let by_url: HashMap<&str, Uuid> = sources.iter().map(|s| (s.original_url.as_str(), s.id)).collect();
        for source in &sources {
            for linked in &source.linked_items {
                if let Some(other) = by_url.get(linked.as_str()).filter(|id| **id != source.id) {
                    self.sources.link(source.id, *other, RelationKind::LinkedNewsItems).await?;
                }
            }
        }
        Ok(sources)
    }

    async fn link_collections(&self, collections: &[WebSourceCollection]) {
        for collection in collections {
            let Some((lead, rest)) = collection.web_sources.split_first() else {
                continue;
            };
            for child in rest {
                if let Err(e) = self.sources.link(lead.id, child.id, RelationKind::ParentChildLink).await {
                    warn!("Could not link {} to {}: {}", lead.id, child.id, e);
                }
            }
        }
    }

    /// Write and repair one segment per collection in parallel. Returns the
    /// segments that succeeded, in collection order, with their collections.
    async fn write_segments(
        &self,
        collections: &[WebSourceCollection],
        config: &ConversationConfig,
        previous_episodes: &str,
    ) -> Result<(Vec<Transcript>, Vec<WebSourceCollection>)> {
        let pipeline = &self.settings.pipeline;
        let article_count: usize = collections.iter().map(WebSourceCollection::article_count).sum();
        let targets = segment_targets(collections, config.combined_target(article_count));
        let retries = if collections.len() == 1 {
            pipeline.single_retries
        } else {
            pipeline.segment_retries
        };

        let mut group = TaskGroup::new("segments", pipeline.workers);
        for (collection, target) in collections.iter().zip(targets) {
            let this = self.clone();
            let config = config.clone();
            let content = collection.content();
            let main_item = collection.main_item;
            let previous_episodes = previous_episodes.to_string();
            group.spawn(async move {
                this.write_segment(content, config, target, main_item, previous_episodes, retries)
                    .await
            });
        }
        let results = group
            .join_all(Duration::from_secs(pipeline.segment_timeout_secs))
            .await;

        let mut segments = Vec::new();
        let mut written = Vec::new();
        for (collection, result) in collections.iter().zip(results) {
            match result {
                Some(Ok(segment)) => {
                    segments.push(segment);
                    written.push(collection.clone());
                }
                Some(Err(e)) => warn!("Segment '{}' failed: {}", collection.title, e),
                None => warn!("Segment '{}' did not finish in time", collection.title),
            }
        }
        if segments.is_empty() {
            return Err(PanelistError::Generation("no segment could be written".to_string()));
        }
        info!("Wrote {} of {} segments", segments.len(), collections.len());
        Ok((segments, written))
    }

    async fn write_segment(
        &self,
        content: String,
        config: ConversationConfig,
        target: Option<usize>,
        main_item: bool,
        previous_episodes: String,
        retries: usize,
    ) -> Result<Transcript> {
        let writer = SegmentWriter::new(self.llm.clone(), self.prompts.clone())
            .with_retries(self.settings.pipeline.writer_retries)
            .with_parse_retries(self.settings.llm.parse_retries);
        let draft = writer
            .write(&SegmentRequest {
                content: &content,
                config: &config,
                word_count: target.unwrap_or(self.settings.pipeline.min_target_words),
                main_item,
                add_detail: config.longform,
                previous_segments: &[],
                previous_episodes: &previous_episodes,
            })
            .await?;
        let outcome = self
            .repair_loop()
            .run(RepairRequest {
                transcript: draft,
                content: &content,
                config: &config,
                word_count: target,
                previous_episodes: &previous_episodes,
                retries,
            })
            .await;
        Ok(outcome.transcript)
    }

    async fn summarize(
        &self,
        transcript: &Transcript,
        collections: &[WebSourceCollection],
        config: &ConversationConfig,
    ) -> TranscriptSummary {
        let summarizer = Summarizer::new(self.llm.clone(), self.prompts.clone())
            .with_parse_retries(self.settings.llm.parse_retries);
        match summarizer.summarize(transcript, collections, config).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summary failed, deriving one from the collections: {}", e);
                fallback_summary(collections)
            }
        }
    }

    /// Queue the audio stage for a finished transcript.
    async fn hand_off(&self, row: &PanelTranscript, tts_model: Option<String>) -> Result<()> {
        let audio = PanelAudio::for_transcript(row, tts_model);
        self.panels.upsert_audio(&audio).await?;
        debug!("Queued audio {} for transcript {}", audio.id, row.id);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_all(
        &self,
        parent: &PanelTranscript,
        text: &Transcript,
        request: &GenerationRequest,
        config: &ConversationConfig,
        content: &str,
        article_count: usize,
        previous_episodes: &str,
    ) -> Vec<PanelTranscript> {
        let mut languages: Vec<String> = Vec::new();
        for language in &request.languages {
            if same_language(language, &config.output_language) || languages.iter().any(|l| same_language(l, language)) {
                continue;
            }
            languages.push(language.clone());
        }
        if languages.is_empty() {
            return Vec::new();
        }

        let mut group = TaskGroup::new("translate", self.settings.pipeline.workers);
        for language in languages {
            let this = self.clone();
            let parent = parent.clone();
            let text = text.clone();
            let config = config.clone();
            let content = content.to_string();
            let previous_episodes = previous_episodes.to_string();
            let tts_model = request.tts_model.clone();
            group.spawn(async move {
                this.translate_child(&parent, &text, &language, &config, &content, article_count, &previous_episodes, tts_model)
                    .await
            });
        }
        group
            .join_all(Duration::from_secs(self.settings.pipeline.combine_timeout_secs))
            .await
            .into_iter()
            .flatten()
            .filter_map(|r| r.map_err(|e| warn!("Translation failed: {}", e)).ok())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_child(
        &self,
        parent: &PanelTranscript,
        text: &Transcript,
        language: &str,
        config: &ConversationConfig,
        content: &str,
        article_count: usize,
        previous_episodes: &str,
        tts_model: Option<String>,
    ) -> Result<PanelTranscript> {
        let mut child = PanelTranscript::new(&parent.panel_id, language, &parent.bucket);
        child.transcript_parent_id = Some(parent.id);
        child.title = parent.title.clone();
        child.owner_id = parent.owner_id.clone();
        child.organization_id = parent.organization_id.clone();
        child.metadata.subjects = parent.metadata.subjects.clone();
        child.metadata.images = parent.metadata.images.clone();
        child.metadata.conversation_config = Some(serde_json::to_value(config.with_language(language))?);
        child.transition(ProcessState::Processing, None);
        self.panels.upsert_transcript(&child).await?;

        let translator = Translator::new(self.llm.clone(), self.prompts.clone())
            .with_repair(self.repair_loop())
            .with_parse_retries(self.settings.llm.parse_retries);
        let result = translator
            .translate(TranslateRequest {
                transcript: text,
                target_language: language,
                content,
                config,
                article_count,
                previous_episodes,
                retries: self.settings.pipeline.translation_retries,
            })
            .await;

        let stored = match result {
            Ok(translated) => store_transcript(self.blobs.as_ref(), &mut child, &translated.render()).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(_) => {
                child.transition(ProcessState::Done, None);
                self.panels.upsert_transcript(&child).await?;
                self.hand_off(&child, tts_model).await?;
                info!("Translation {} ({}) done", child.id, language);
                Ok(child)
            }
            Err(e) => {
                child.transition(ProcessState::Failed, Some(e.to_string()));
                self.panels.upsert_transcript(&child).await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlm, PASS};
    use crate::resolver::StaticFetcher;
    use crate::store::{MemoryBlobStore, MemoryStore};
    use serde_json::json;

    const PAGE: &str = r#"<html lang="en"><head><title>Chip plant opens</title></head>
<body><article><p>A new chip plant opened in Oulu on Monday and will employ three thousand people.</p></article></body></html>"#;

    fn talk(word: &str, words: usize, turns: usize) -> String {
        let per_turn = (words / turns).max(1);
        (0..turns)
            .map(|i| format!("<Person{0}>{1}</Person{0}>", i % 2 + 1, vec![word; per_turn].join(" ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    struct Harness {
        orchestrator: Orchestrator,
        llm: Arc<MockLlm>,
        store: Arc<MemoryStore>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn harness(fetcher: StaticFetcher) -> Harness {
        let llm = Arc::new(MockLlm::new());
        llm.respond_with("formatter", |r| {
            if r.user_prompt().contains("Rail") {
                "The rail strike ended after two weeks.".to_string()
            } else {
                "A new chip plant opened in Oulu and will employ three thousand people.".to_string()
            }
        });
        llm.respond_with("validator", |_| r#"{"is_valid": true, "reason": "news"}"#.to_string());
        llm.respond_with("quality", |_| PASS.to_string());
        llm.respond_with("intro", |_| talk("hello", 20, 4));
        llm.respond_with("conclusion", |_| talk("goodbye", 20, 4));
        llm.respond_with("bridge", |_| talk("meanwhile", 20, 4));
        llm.respond_with("summary", |_| {
            json!({"title": "Oulu chip plant opens", "description": "A new plant. Many jobs.", "subjects": []}).to_string()
        });

        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut settings = Settings::default();
        settings.llm.parse_retries = 1;
        let orchestrator = Orchestrator::with_components(
            settings,
            Prompts::default(),
            Components {
                llm: llm.clone(),
                fetcher: Arc::new(fetcher),
                sources: store.clone(),
                panels: store.clone(),
                blobs: blobs.clone(),
                http: reqwest::Client::new(),
            },
        );
        Harness {
            orchestrator,
            llm,
            store,
            blobs,
        }
    }

    #[tokio::test]
    async fn test_single_url_episode() {
        let h = harness(StaticFetcher::new().page("https://example.test/article", PAGE));
        h.llm.respond_with("segment", |_| talk("chip", 240, 6));
        let request: GenerationRequest = serde_json::from_value(json!({
            "panel_id": "tech",
            "input_source": "https://example.test/article",
            "conversation_config": {"word_count": 250, "output_language": "English"},
            "tts_model": "voice-a"
        }))
        .unwrap();

        let outcome = h.orchestrator.generate(&request).await.unwrap();
        assert_eq!(h.llm.count("segment"), 1);
        assert_eq!(h.llm.count("grouping"), 0);
        assert_eq!(h.llm.count("intro"), 1);
        assert_eq!(h.llm.count("conclusion"), 1);
        assert_eq!(outcome.text.word_count(), 20 + 240 + 20);

        let row = h.store.get_transcript(outcome.transcript.id).await.unwrap().unwrap();
        assert_eq!(row.process_state, ProcessState::Done);
        assert_eq!(row.title.as_deref(), Some("Oulu chip plant opens"));
        let file = row.file.clone().unwrap();
        assert!(file.starts_with("tech/"));
        assert!(file.ends_with(&format!("_English_{}/transcript.xml", row.id)));

        let stored = h.blobs.get("transcripts", &file).await.unwrap().unwrap();
        let stored = String::from_utf8(stored).unwrap();
        assert!(stored.starts_with("<Person1>"));
        assert!(stored.ends_with("</Person2>"));

        let audio = h.store.audio_for_transcript(row.id).await.unwrap();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].process_state, ProcessState::Waiting);
        assert_eq!(audio[0].tts_model.as_deref(), Some("voice-a"));
        assert!(h.store.exists("https://example.test/article").await.unwrap());
    }

    #[tokio::test]
    async fn test_three_urls_two_segments_in_order() {
        let rail = PAGE.replace("Chip plant opens", "Rail strike ends");
        let h = harness(
            StaticFetcher::new()
                .page("https://a.test/chips", PAGE)
                .page("https://b.test/chips", PAGE)
                .page("https://c.test/rail", &rail),
        );
        let chips_a = crate::models::md5_hex("https://a.test/chips");
        let chips_b = crate::models::md5_hex("https://b.test/chips");
        let rail_id = crate::models::md5_hex("https://c.test/rail");
        h.llm.push(
            "grouping",
            json!({"ordered_groups": [[chips_a, chips_b], [rail_id]], "main_group": 0}).to_string(),
        );
        h.llm.respond_with("segment", |r| {
            if r.user_prompt().contains("rail strike") {
                talk("rail", 240, 6)
            } else {
                talk("chip", 320, 8)
            }
        });
        let request: GenerationRequest = serde_json::from_value(json!({
            "panel_id": "tech",
            "input_source": ["https://a.test/chips", "https://b.test/chips", "https://c.test/rail"],
            "segments": 2,
            "longform": false,
            "conversation_config": {"word_count": 600}
        }))
        .unwrap();

        let outcome = h.orchestrator.generate(&request).await.unwrap();
        assert_eq!(h.llm.count("grouping"), 1);
        assert_eq!(h.llm.count("segment"), 2);
        assert_eq!(h.llm.count("bridge"), 1);
        assert_eq!(outcome.text.word_count(), 20 + 320 + 20 + 240 + 20);

        let rendered = outcome.text.render();
        let chip_at = rendered.find("chip").unwrap();
        let bridge_at = rendered.find("meanwhile").unwrap();
        let rail_at = rendered.find("rail").unwrap();
        assert!(chip_at < bridge_at && bridge_at < rail_at);

        let grouping_prompt = h.llm.requests("grouping")[0].user_prompt().to_string();
        assert!(grouping_prompt.contains(&rail_id));
        let main_prompt = h
            .llm
            .requests("segment")
            .into_iter()
            .find(|r| !r.user_prompt().contains("rail strike"))
            .unwrap();
        assert!(main_prompt.user_prompt().contains("at least 400 words"));
    }

    #[tokio::test]
    async fn test_no_sources_skips_grouping_and_writing() {
        let h = harness(StaticFetcher::new());
        let request = GenerationRequest {
            panel_id: "tech".to_string(),
            ..Default::default()
        };

        let err = h.orchestrator.generate(&request).await.unwrap_err();
        assert!(err.to_string().contains("no sources"));
        assert_eq!(h.llm.count("grouping"), 0);
        assert_eq!(h.llm.count("segment"), 0);

        let rows = h.store.list_transcripts("tech").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].process_state, ProcessState::Failed);
        assert!(rows[0].process_fail_message.as_deref().unwrap().contains("no sources"));
    }

    #[tokio::test]
    async fn test_failed_resolution_is_persisted_and_skipped() {
        let h = harness(StaticFetcher::new().page("https://example.test/article", PAGE));
        h.llm.respond_with("segment", |_| talk("chip", 240, 6));
        let request: GenerationRequest = serde_json::from_value(json!({
            "panel_id": "tech",
            "input_source": "https://example.test/article https://gone.test/missing",
            "conversation_config": {"word_count": 250}
        }))
        .unwrap();

        h.orchestrator.generate(&request).await.unwrap();
        let failed = h.store.load("https://gone.test/missing").await.unwrap().unwrap();
        assert_eq!(failed.resolve_state, crate::models::ResolveState::Failed);
        assert_eq!(h.llm.count("grouping"), 0);
    }

    #[tokio::test]
    async fn test_translation_links_to_parent() {
        let h = harness(StaticFetcher::new().page("https://example.test/article", PAGE));
        h.llm.respond_with("segment", |_| talk("chip", 240, 6));
        h.llm.respond_with("translate", |r| {
            let turns = r.user_prompt().matches("</Person").count();
            talk("siru", turns * 10, turns)
        });
        let request: GenerationRequest = serde_json::from_value(json!({
            "panel_id": "tech",
            "input_source": "https://example.test/article",
            "languages": ["Finnish", "English"],
            "conversation_config": {"word_count": 0}
        }))
        .unwrap();

        let outcome = h.orchestrator.generate(&request).await.unwrap();
        assert_eq!(outcome.translations.len(), 1);
        let child = &outcome.translations[0];
        assert_eq!(child.transcript_parent_id, Some(outcome.transcript.id));
        assert_eq!(child.language, "Finnish");
        assert_eq!(child.process_state, ProcessState::Done);
        assert_eq!(h.store.children(outcome.transcript.id).await.unwrap().len(), 1);
        assert_eq!(h.store.audio_for_transcript(child.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_upload_is_deduplicated() {
        let blobs = MemoryBlobStore::new();
        let mut row = PanelTranscript::new("tech", "English", "transcripts");

        let first = store_transcript(&blobs, &mut row, "<Person1>a</Person1><Person2>b</Person2>").await.unwrap();
        assert!(first.ends_with("/transcript.xml"));
        let again = store_transcript(&blobs, &mut row, "<Person1>a</Person1><Person2>b</Person2>").await.unwrap();
        assert_eq!(again, first);
        assert_eq!(blobs.write_count(), 1);

        let second = store_transcript(&blobs, &mut row, "<Person1>c</Person1><Person2>d</Person2>").await.unwrap();
        assert!(second.ends_with("/transcript_v2.xml"));
        assert_eq!(row.metadata.transcript_history, vec![first.clone()]);

        let back = store_transcript(&blobs, &mut row, "<Person1>a</Person1><Person2>b</Person2>").await.unwrap();
        assert_eq!(back, first);
        assert_eq!(blobs.write_count(), 2);
        assert_eq!(row.metadata.transcript_history, vec![second.clone()]);
        assert_eq!(row.file.as_deref(), Some(first.as_str()));

        let third = store_transcript(&blobs, &mut row, "<Person1>e</Person1><Person2>f</Person2>").await.unwrap();
        assert!(third.ends_with("/transcript_v3.xml"));
        assert_eq!(row.metadata.transcript_history, vec![second, first]);
        assert_eq!(blobs.write_count(), 3);
    }

    #[test]
    fn test_segment_targets_weight_main_item() {
        let mut a = WebSourceCollection::new("A", 5);
        a.main_item = true;
        let b = WebSourceCollection::new("B", 5);
        assert_eq!(segment_targets(&[a.clone(), b.clone()], Some(600)), vec![Some(400), Some(200)]);
        assert_eq!(segment_targets(&[a], Some(250)), vec![Some(250)]);
        assert_eq!(segment_targets(&[b], None), vec![None]);
    }
}
