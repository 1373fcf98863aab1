//! Verify-and-rewrite loop for transcripts.
//!
//! Each iteration first moves the length toward its target band, then asks
//! the verifier for issues and, if any remain, rewrites with the issues and
//! the length instruction as feedback. A rewrite that moves away from the
//! band is discarded, so the accepted transcript never drifts from its target.
//! When the budget runs out the best accepted version is returned.

mod adjust;
mod length;
mod verify;

pub use adjust::{moved_enough, LengthAdjuster, ADJUST_ATTEMPTS, MIN_MOVE};
pub use length::{
    check_transcript_length, LengthChange, LengthCheck, LengthPolicy, DEFAULT_MIN_TARGET_WORDS,
    DEFAULT_TOLERANCE,
};
pub use verify::{local_checks, Verifier, MAX_TURN_CHARS};

use crate::config::{ConversationConfig, Prompts};
use crate::error::Result;
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::models::TranscriptQualityCheck;
use crate::transcript::{parse_transcript, Transcript};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Issues passed to the rewriter per iteration.
const MAX_FEEDBACK_ISSUES: usize = 5;

/// One repair run.
#[derive(Debug, Clone)]
pub struct RepairRequest<'a> {
    pub transcript: Transcript,
    pub content: &'a str,
    pub config: &'a ConversationConfig,
    /// Desired words. `None` or zero runs a single quality pass.
    pub word_count: Option<usize>,
    pub previous_episodes: &'a str,
    /// Iteration budget.
    pub retries: usize,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub transcript: Transcript,
    pub iterations: usize,
    /// Passed verification inside the length band.
    pub converged: bool,
    pub last_check: Option<TranscriptQualityCheck>,
}

/// Compose the rewriter feedback from the length instruction and issues.
pub fn compose_feedback(length: &LengthCheck, check: &TranscriptQualityCheck) -> String {
    let mut parts = Vec::new();
    if let Some(instruction) = &length.instruction {
        parts.push(format!("- {}", instruction));
    }
    parts.extend(
        check
            .ranked_issues()
            .into_iter()
            .take(MAX_FEEDBACK_ISSUES)
            .map(|i| i.as_feedback()),
    );
    if parts.is_empty() {
        "- Polish the dialogue; keep facts and length.".to_string()
    } else {
        parts.join("\n")
    }
}

/// Whether a rewrite from `prev` to `next` words may replace the current version.
pub fn accept_rewrite(policy: &LengthPolicy, direction: LengthChange, prev: usize, next: usize) -> bool {
    let wrong_way = match direction {
        LengthChange::Extend => next < prev,
        LengthChange::Shorten => next > prev,
        LengthChange::Keep => false,
    };
    !wrong_way && policy.deviation(next) <= policy.deviation(prev)
}

pub struct RepairLoop {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    verifier: Verifier,
    adjuster: LengthAdjuster,
    floor: usize,
    tolerance: f64,
    parse_retries: u32,
}

impl RepairLoop {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            verifier: Verifier::new(llm.clone(), prompts.clone()),
            adjuster: LengthAdjuster::new(llm.clone(), prompts.clone()),
            llm,
            prompts,
            floor: DEFAULT_MIN_TARGET_WORDS,
            tolerance: DEFAULT_TOLERANCE,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_length_policy(mut self, floor: usize, tolerance: f64) -> Self {
        self.floor = floor;
        self.tolerance = tolerance;
        self
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self.verifier = self.verifier.with_parse_retries(retries);
        self.adjuster = self.adjuster.with_parse_retries(retries);
        self
    }

    pub fn policy(&self, word_count: Option<usize>) -> LengthPolicy {
        LengthPolicy::new(word_count, self.floor, self.tolerance)
    }

    async fn rewrite(
        &self,
        transcript: &Transcript,
        feedback: &str,
        direction: LengthChange,
        target: usize,
        request: &RepairRequest<'_>,
    ) -> Result<Transcript> {
        let (name, prompts) = match direction {
            LengthChange::Extend => ("rewriter_extend", &self.prompts.rewriter_extend),
            LengthChange::Shorten => ("rewriter_reduce", &self.prompts.rewriter_reduce),
            LengthChange::Keep => ("rewriter", &self.prompts.rewriter),
        };
        let mut vars = request.config.prompt_vars();
        vars.insert("feedback".to_string(), feedback.to_string());
        vars.insert("word_count".to_string(), target.to_string());
        vars.insert("content".to_string(), request.content.to_string());
        vars.insert("transcript".to_string(), transcript.render());
        Chain::from_prompts(name, self.llm.clone(), &self.prompts, prompts, &vars)
            .with_temperature(request.config.creativity)
            .with_parse_retries(self.parse_retries)
            .invoke_with_repair(parse_transcript)
            .await
    }

    /// Run the loop. Never fails: model errors keep the current version.
    #[instrument(skip_all, fields(target = ?request.word_count, budget = request.retries))]
    pub async fn run(&self, request: RepairRequest<'_>) -> RepairOutcome {
        let policy = self.policy(request.word_count);
        let budget = if policy.target.is_none() {
            request.retries.min(1)
        } else {
            request.retries
        };
        let mut current = request.transcript.clone();
        let mut last_check = None;

        for iteration in 1..=budget {
            if policy.check(current.word_count()).change != LengthChange::Keep {
                current = self
                    .adjuster
                    .adjust(current, &policy, request.content, request.config)
                    .await;
            }
            let length = policy.check(current.word_count());

            let check = self
                .verifier
                .verify(&current, request.content, request.previous_episodes, request.config)
                .await;
            if check.passes() && length.change == LengthChange::Keep {
                info!("Repair converged after {} iteration(s) at {} words", iteration, length.words);
                return RepairOutcome {
                    transcript: current,
                    iterations: iteration,
                    converged: true,
                    last_check: Some(check),
                };
            }

            let feedback = compose_feedback(&length, &check);
            let target = policy.target.unwrap_or(length.words);
            match self.rewrite(&current, &feedback, length.change, target, &request).await {
                Ok(candidate) => {
                    let next = candidate.word_count();
                    if accept_rewrite(&policy, length.change, length.words, next) {
                        debug!("Rewrite {} accepted: {} -> {} words", iteration, length.words, next);
                        current = candidate;
                    } else {
                        warn!(
                            "Rewrite {} moved away from the target ({} -> {} words), reverting",
                            iteration, length.words, next
                        );
                    }
                }
                Err(e) => warn!("Rewrite {} failed: {}", iteration, e),
            }
            last_check = Some(check);
        }

        if budget > 0 {
            warn!(
                "Repair budget of {} exhausted, keeping best version ({} words)",
                budget,
                current.word_count()
            );
        }
        RepairOutcome {
            transcript: current,
            iterations: budget,
            converged: false,
            last_check,
        }
    }
}
