//! Segment writer: one dialogue segment for one group of sources.

use crate::config::{ConversationConfig, Prompts};
use crate::error::{PanelistError, Result};
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::transcript::{parse_transcript, Transcript};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Attempts on empty or wrapped output before the segment fails.
pub const DEFAULT_WRITER_RETRIES: usize = 3;

/// Turns from each earlier segment shown to the writer.
const PREVIOUS_SEGMENT_TURNS: usize = 4;

const WRAPPER_PREFIXES: &[&str] = &["AIMessage(", "ChatCompletion(", "content=", "{\"content\"", "{\"text\"", "{\"message\""];

/// Everything the writer needs for one segment.
#[derive(Debug, Clone)]
pub struct SegmentRequest<'a> {
    pub content: &'a str,
    pub config: &'a ConversationConfig,
    /// Minimum words to ask for.
    pub word_count: usize,
    pub main_item: bool,
    pub add_detail: bool,
    pub previous_segments: &'a [Transcript],
    pub previous_episodes: &'a str,
}

/// Whether the model returned a serialized message object instead of dialogue.
pub fn is_transport_wrapper(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    WRAPPER_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn parse_segment(raw: &str) -> Result<Transcript> {
    if raw.trim().is_empty() {
        return Err(PanelistError::Generation("empty output".to_string()));
    }
    if is_transport_wrapper(raw) {
        return Err(PanelistError::Generation("response wrapper instead of dialogue".to_string()));
    }
    parse_transcript(raw)
}

pub struct SegmentWriter {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    retries: usize,
    parse_retries: u32,
}

impl SegmentWriter {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            llm,
            prompts,
            retries: DEFAULT_WRITER_RETRIES,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    fn chain(&self, request: &SegmentRequest<'_>) -> Chain {
        let mut vars = request.config.prompt_vars();
        let previous = if request.previous_segments.is_empty() {
            "(none)".to_string()
        } else {
            request
                .previous_segments
                .iter()
                .map(|s| s.tail(PREVIOUS_SEGMENT_TURNS))
                .collect::<Vec<_>>()
                .join("\n...\n")
        };
        vars.extend([
            ("word_count".to_string(), request.word_count.to_string()),
            (
                "main_item_note".to_string(),
                if request.main_item {
                    "This is the main story of the episode. Give it the most depth and emphasis.".to_string()
                } else {
                    String::new()
                },
            ),
            (
                "detail_note".to_string(),
                if request.add_detail {
                    "Go into specifics: names, figures, quotes and consequences from the sources.".to_string()
                } else {
                    String::new()
                },
            ),
            (
                "user_instructions".to_string(),
                request
                    .config
                    .user_instructions
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| format!("Additional instructions: {}", s))
                    .unwrap_or_default(),
            ),
            ("previous_segments".to_string(), previous),
            (
                "previous_episodes".to_string(),
                if request.previous_episodes.trim().is_empty() {
                    "(none)".to_string()
                } else {
                    request.previous_episodes.to_string()
                },
            ),
            ("content".to_string(), request.content.to_string()),
        ]);
        Chain::from_prompts("segment", self.llm.clone(), &self.prompts, &self.prompts.segment, &vars)
            .with_temperature(request.config.creativity)
            .with_parse_retries(self.parse_retries)
    }

    /// Write and parse one segment. Empty or wrapped output is retried; parse
    /// errors are repaired inside the chain.
    #[instrument(skip_all, fields(words = request.word_count, main = request.main_item))]
    pub async fn write(&self, request: &SegmentRequest<'_>) -> Result<Transcript> {
        let chain = self.chain(request);
        let mut last_error = None;
        for attempt in 1..=self.retries {
            match chain.invoke_with_repair(parse_segment).await {
                Ok(segment) => {
                    debug!("Segment written: {} words, {} turns", segment.word_count(), segment.len());
                    return Ok(segment);
                }
                Err(e @ PanelistError::Generation(_)) | Err(e @ PanelistError::Llm(_)) => {
                    warn!("Segment attempt {}/{} failed: {}", attempt, self.retries, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(PanelistError::Generation(format!(
            "segment failed after {} attempts: {}",
            self.retries,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{dialogue, MockLlm};

    fn request<'a>(config: &'a ConversationConfig) -> SegmentRequest<'a> {
        SegmentRequest {
            content: "Title: Chip plant opens\n\nThe plant employs three thousand people.",
            config,
            word_count: 300,
            main_item: true,
            add_detail: false,
            previous_segments: &[],
            previous_episodes: "",
        }
    }

    #[tokio::test]
    async fn test_prompt_carries_contract() {
        let llm = Arc::new(MockLlm::new());
        llm.push("segment", dialogue(300, 6));
        let config = ConversationConfig::default();
        let writer = SegmentWriter::new(llm.clone(), Arc::new(Prompts::default()));

        let segment = writer.write(&request(&config)).await.unwrap();
        assert!(segment.has_show_shape());

        let sent = &llm.requests("segment")[0];
        assert!(sent.user_prompt().contains("at least 300 words"));
        assert!(sent.user_prompt().contains("main story"));
        assert!(sent.system_prompt().contains("Alex"));
        assert!(sent.system_prompt().contains("absolutely"));
        assert!(sent.system_prompt().contains("<Person1>"));
        assert!((sent.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_retries_empty_and_wrapped_output() {
        let llm = Arc::new(MockLlm::new());
        llm.push("segment", "   ");
        llm.push("segment", r#"{"content": "<Person1>hi</Person1>"}"#);
        llm.push("segment", dialogue(100, 4));
        let config = ConversationConfig::default();
        let writer = SegmentWriter::new(llm.clone(), Arc::new(Prompts::default()));

        assert!(writer.write(&request(&config)).await.is_ok());
        assert_eq!(llm.count("segment"), 3);
    }

    #[tokio::test]
    async fn test_three_failures_are_fatal() {
        let llm = Arc::new(MockLlm::new());
        llm.respond_with("segment", |_| String::new());
        let config = ConversationConfig::default();
        let writer = SegmentWriter::new(llm.clone(), Arc::new(Prompts::default()));

        let err = writer.write(&request(&config)).await.unwrap_err();
        assert!(matches!(err, PanelistError::Generation(_)));
        assert_eq!(llm.count("segment"), 3);
    }

    #[tokio::test]
    async fn test_parse_errors_are_repaired_in_chain() {
        let llm = Arc::new(MockLlm::new());
        llm.push("segment", "Here is the dialogue without any tags.");
        llm.push("segment", dialogue(50, 2));
        let config = ConversationConfig::default();
        let writer = SegmentWriter::new(llm.clone(), Arc::new(Prompts::default()));

        writer.write(&request(&config)).await.unwrap();
        let second = &llm.requests("segment")[1];
        assert!(second.user_prompt().contains("could not be used"));
    }
}
