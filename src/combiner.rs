//! Stitches ordered segments into one show: intro, bridges, conclusion, and a
//! final repair pass over the whole.

use crate::config::{ConversationConfig, IntroMode, Prompts};
use crate::error::{PanelistError, Result};
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::models::WebSourceCollection;
use crate::repair::{RepairLoop, RepairRequest};
use crate::transcript::{parse_transcript, Transcript};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Repair budget for the combined show.
pub const DEFAULT_COMBINED_RETRIES: usize = 6;

/// Turns of context shown around a seam.
const SEAM_TURNS: usize = 4;
/// Turns of the body shown to the short conclusion.
const SHORT_CONCLUSION_TURNS: usize = 6;

/// Inputs for one combination.
#[derive(Debug, Clone)]
pub struct CombineRequest<'a> {
    /// Segments in episode order.
    pub segments: &'a [Transcript],
    /// Collections in the same order, for topic previews.
    pub collections: &'a [WebSourceCollection],
    pub config: &'a ConversationConfig,
    /// Source content of the whole episode.
    pub content: &'a str,
    pub previous_episodes: &'a str,
    pub date: NaiveDate,
    pub retries: usize,
}

pub struct Combiner {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    repair: RepairLoop,
    parse_retries: u32,
}

fn topics_block(collections: &[WebSourceCollection]) -> String {
    collections
        .iter()
        .map(|c| format!("- {}", c.title))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Combiner {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            repair: RepairLoop::new(llm.clone(), prompts.clone()),
            llm,
            prompts,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_repair(mut self, repair: RepairLoop) -> Self {
        self.repair = repair;
        self
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    async fn dialogue(
        &self,
        name: &str,
        group: &crate::config::ChainPrompts,
        config: &ConversationConfig,
        extra: HashMap<String, String>,
    ) -> Result<Transcript> {
        let mut vars = config.prompt_vars();
        vars.extend(extra);
        Chain::from_prompts(name, self.llm.clone(), &self.prompts, group, &vars)
            .with_temperature(config.creativity)
            .with_parse_retries(self.parse_retries)
            .invoke_with_repair(parse_transcript)
            .await
    }

    async fn intro(&self, request: &CombineRequest<'_>, mode: IntroMode) -> Result<Transcript> {
        let location_note = request
            .config
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(|l| format!(" The show is recorded in {}.", l))
            .unwrap_or_default();
        let vars = HashMap::from([
            ("date".to_string(), request.date.format("%A, %B %-d, %Y").to_string()),
            ("location_note".to_string(), location_note),
            ("topics".to_string(), topics_block(request.collections)),
            (
                "first_segment".to_string(),
                request.segments.first().map(|s| s.head(SEAM_TURNS)).unwrap_or_default(),
            ),
        ]);
        match mode {
            IntroMode::Short => self.dialogue("intro_short", &self.prompts.intro_short, request.config, vars).await,
            _ => self.dialogue("intro", &self.prompts.intro, request.config, vars).await,
        }
    }

    async fn bridge(&self, previous: &Transcript, next: &Transcript, config: &ConversationConfig) -> Result<Transcript> {
        let vars = HashMap::from([
            ("previous_tail".to_string(), previous.tail(SEAM_TURNS)),
            ("next_head".to_string(), next.head(SEAM_TURNS)),
        ]);
        self.dialogue("bridge", &self.prompts.bridge, config, vars).await
    }

    async fn conclusion(&self, body: &Transcript, config: &ConversationConfig, mode: IntroMode) -> Result<Transcript> {
        match mode {
            IntroMode::Short => {
                let vars = HashMap::from([("transcript".to_string(), body.tail(SHORT_CONCLUSION_TURNS))]);
                self.dialogue("conclusion_short", &self.prompts.conclusion_short, config, vars).await
            }
            _ => {
                let vars = HashMap::from([("transcript".to_string(), body.render())]);
                self.dialogue("conclusion", &self.prompts.conclusion, config, vars).await
            }
        }
    }

    /// Body of the show: segments with bridges at every seam. A failed bridge
    /// leaves the seam as a direct cut.
    pub async fn stitch(&self, segments: &[Transcript], config: &ConversationConfig) -> Transcript {
        let mut parts: Vec<Transcript> = Vec::with_capacity(segments.len() * 2);
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                match self.bridge(&segments[i - 1], segment, config).await {
                    Ok(bridge) => parts.push(bridge),
                    Err(e) => warn!("Bridge {} -> {} failed, cutting directly: {}", i - 1, i, e),
                }
            }
            parts.push(segment.clone());
        }
        Transcript::concat(&parts)
    }

    /// Build the full show and run the combined repair pass.
    #[instrument(skip_all, fields(segments = request.segments.len()))]
    pub async fn combine(&self, request: CombineRequest<'_>) -> Result<Transcript> {
        if request.segments.is_empty() {
            return Err(PanelistError::Generation("no segments to combine".to_string()));
        }
        let mode = request.config.intro_mode();
        let body = self.stitch(request.segments, request.config).await;

        let mut parts = Vec::with_capacity(3);
        if mode != IntroMode::Disabled {
            match self.intro(&request, mode).await {
                Ok(intro) => parts.push(intro),
                Err(e) => warn!("Intro failed, starting with the first segment: {}", e),
            }
        }
        parts.push(body.clone());
        if mode != IntroMode::Disabled {
            match self.conclusion(&body, request.config, mode).await {
                Ok(conclusion) => parts.push(conclusion),
                Err(e) => warn!("Conclusion failed, ending with the last segment: {}", e),
            }
        }
        let combined = Transcript::concat(&parts);

        let article_count: usize = request.collections.iter().map(|c| c.article_count()).sum();
        let target = request.config.combined_target(article_count.max(request.segments.len()));
        debug!(
            "Combined {} words from {} segments, target {:?}",
            combined.word_count(),
            request.segments.len(),
            target
        );

        let outcome = self
            .repair
            .run(RepairRequest {
                transcript: combined,
                content: request.content,
                config: request.config,
                word_count: target,
                previous_episodes: request.previous_episodes,
                retries: request.retries,
            })
            .await;
        info!(
            "Combined transcript: {} words after {} repair iteration(s)",
            outcome.transcript.word_count(),
            outcome.iterations
        );
        Ok(outcome.transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{dialogue, MockLlm, PASS};
    use crate::models::WebSource;

    fn segment(words: usize) -> Transcript {
        parse_transcript(&dialogue(words, 6)).unwrap()
    }

    fn collections(n: usize) -> Vec<WebSourceCollection> {
        (0..n)
            .map(|i| {
                let mut c = WebSourceCollection::new(format!("Story {}", i), 5);
                c.push(WebSource::new(format!("Story {}", i), format!("https://example.test/{}", i), "test"));
                c
            })
            .collect()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()
    }

    fn scripted() -> Arc<MockLlm> {
        let llm = Arc::new(MockLlm::new());
        llm.respond_with("intro", |_| dialogue(40, 4));
        llm.respond_with("intro_short", |_| dialogue(20, 4));
        llm.respond_with("bridge", |_| dialogue(30, 4));
        llm.respond_with("conclusion", |_| dialogue(40, 4));
        llm.respond_with("conclusion_short", |_| dialogue(20, 2));
        llm.respond_with("quality", |_| PASS.to_string());
        llm
    }

    #[tokio::test]
    async fn test_single_segment_has_no_bridges() {
        let llm = scripted();
        let config = ConversationConfig {
            word_count: Some(300),
            ..Default::default()
        };
        let segments = vec![segment(240)];
        let cols = collections(1);
        let combiner = Combiner::new(llm.clone(), Arc::new(Prompts::default()));

        let out = combiner
            .combine(CombineRequest {
                segments: &segments,
                collections: &cols,
                config: &config,
                content: "src",
                previous_episodes: "",
                date: date(),
                retries: 6,
            })
            .await
            .unwrap();
        assert_eq!(llm.count("bridge"), 0);
        assert_eq!(llm.count("intro"), 1);
        assert_eq!(llm.count("conclusion"), 1);
        assert_eq!(out.word_count(), 320);
        assert!(out.has_show_shape());

        let intro = &llm.requests("intro")[0];
        assert!(intro.user_prompt().contains("Thursday, March 5, 2026"));
        assert!(intro.user_prompt().contains("- Story 0"));
    }

    #[tokio::test]
    async fn test_bridges_between_every_pair() {
        let llm = scripted();
        let config = ConversationConfig {
            word_count: Some(400),
            disable_intro_and_conclusion: true,
            ..Default::default()
        };
        let segments = vec![segment(120), segment(120), segment(120)];
        let cols = collections(3);
        let combiner = Combiner::new(llm.clone(), Arc::new(Prompts::default()));

        let out = combiner
            .combine(CombineRequest {
                segments: &segments,
                collections: &cols,
                config: &config,
                content: "src",
                previous_episodes: "",
                date: date(),
                retries: 6,
            })
            .await
            .unwrap();
        assert_eq!(llm.count("bridge"), 2);
        assert_eq!(llm.count("intro"), 0);
        assert_eq!(llm.count("conclusion"), 0);
        assert_eq!(out.word_count(), 3 * 120 + 2 * 28);
    }

    #[tokio::test]
    async fn test_failed_bridge_is_a_direct_cut() {
        let llm = scripted();
        llm.push("bridge", "no tags at all");
        let config = ConversationConfig {
            word_count: None,
            short_intro_and_conclusion: true,
            ..Default::default()
        };
        let segments = vec![segment(60), segment(60)];
        let cols = collections(2);
        let combiner = Combiner::new(llm.clone(), Arc::new(Prompts::default())).with_parse_retries(0);

        let out = combiner
            .combine(CombineRequest {
                segments: &segments,
                collections: &cols,
                config: &config,
                content: "src",
                previous_episodes: "",
                date: date(),
                retries: 6,
            })
            .await
            .unwrap();
        assert_eq!(llm.count("intro_short"), 1);
        assert_eq!(llm.count("conclusion_short"), 1);
        assert_eq!(out.word_count(), 20 + 60 + 60 + 20);
    }

    #[tokio::test]
    async fn test_no_segments_is_an_error() {
        let llm = scripted();
        let config = ConversationConfig::default();
        let combiner = Combiner::new(llm, Arc::new(Prompts::default()));
        let result = combiner
            .combine(CombineRequest {
                segments: &[],
                collections: &[],
                config: &config,
                content: "",
                previous_episodes: "",
                date: date(),
                retries: 1,
            })
            .await;
        assert!(result.is_err());
    }
}
