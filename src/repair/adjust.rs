//! Compressor and extender: pure length moves before a quality rewrite.

use super::length::{LengthChange, LengthPolicy};
use crate::config::{ConversationConfig, Prompts};
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::transcript::{parse_transcript, Transcript};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per adjustment call.
pub const ADJUST_ATTEMPTS: usize = 3;
/// Each accepted move must change the length by at least this fraction.
pub const MIN_MOVE: f64 = 0.10;
/// Consecutive misses that end the adjustment.
const MAX_MISSES: usize = 2;

/// Whether `next` moved at least [`MIN_MOVE`] away from `prev` in `direction`.
pub fn moved_enough(prev: usize, next: usize, direction: LengthChange) -> bool {
    let prev = prev as f64;
    let next = next as f64;
    match direction {
        LengthChange::Shorten => next <= prev * (1.0 - MIN_MOVE),
        LengthChange::Extend => next >= prev * (1.0 + MIN_MOVE),
        LengthChange::Keep => false,
    }
}

pub struct LengthAdjuster {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    parse_retries: u32,
}

impl LengthAdjuster {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            llm,
            prompts,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    async fn propose(
        &self,
        transcript: &Transcript,
        direction: LengthChange,
        target: usize,
        content: &str,
        config: &ConversationConfig,
    ) -> crate::error::Result<Transcript> {
        let (name, prompts) = match direction {
            LengthChange::Shorten => ("compress", &self.prompts.compress),
            _ => ("extend", &self.prompts.extend),
        };
        let mut vars = config.prompt_vars();
        vars.insert("current_words".to_string(), transcript.word_count().to_string());
        vars.insert("word_count".to_string(), target.to_string());
        vars.insert("transcript".to_string(), transcript.render());
        vars.insert("content".to_string(), content.to_string());
        Chain::from_prompts(name, self.llm.clone(), &self.prompts, prompts, &vars)
            .with_temperature(config.creativity)
            .with_parse_retries(self.parse_retries)
            .invoke_with_repair(parse_transcript)
            .await
    }

    /// Move `transcript` toward the target band. Returns the best accepted
    /// version; the input comes back unchanged when nothing qualifies.
    pub async fn adjust(
        &self,
        transcript: Transcript,
        policy: &LengthPolicy,
        content: &str,
        config: &ConversationConfig,
    ) -> Transcript {
        let Some(target) = policy.target else {
            return transcript;
        };
        let mut current = transcript;
        let mut misses = 0;

        for attempt in 1..=ADJUST_ATTEMPTS {
            let words = current.word_count();
            let direction = policy.check(words).change;
            if direction == LengthChange::Keep {
                break;
            }

            let accepted = match self.propose(&current, direction, target, content, config).await {
                Ok(candidate) => {
                    let next = candidate.word_count();
                    let ok = moved_enough(words, next, direction)
                        && policy.deviation(next) <= policy.deviation(words);
                    debug!(
                        "Length adjust {}/{}: {} -> {} words (target {}, accepted {})",
                        attempt, ADJUST_ATTEMPTS, words, next, target, ok
                    );
                    ok.then_some(candidate)
                }
                Err(e) => {
                    warn!("Length adjust attempt {} failed: {}", attempt, e);
                    None
                }
            };

            match accepted {
                Some(candidate) => {
                    current = candidate;
                    misses = 0;
                }
                None => {
                    misses += 1;
                    if misses >= MAX_MISSES {
                        debug!("Length adjust stopped after {} misses", misses);
                        break;
                    }
                }
            }
        }
        current
    }
}
