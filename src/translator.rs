//! Translation of finished transcripts, followed by a repair pass in the
//! target language.

use crate::config::{ConversationConfig, Prompts};
use crate::error::{PanelistError, Result};
use crate::llm::{Chain, LlmClient, ModelKind, DEFAULT_PARSE_RETRIES};
use crate::repair::{RepairLoop, RepairRequest};
use crate::transcript::{parse_transcript_lenient, spoken_digit_snippets, Transcript};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Repair budget after translation.
pub const DEFAULT_TRANSLATION_RETRIES: usize = 6;

#[derive(Debug, Clone)]
pub struct TranslateRequest<'a> {
    pub transcript: &'a Transcript,
    pub target_language: &'a str,
    /// Source content of the episode.
    pub content: &'a str,
    /// Config of the original; its `output_language` is the source language.
    pub config: &'a ConversationConfig,
    pub article_count: usize,
    pub previous_episodes: &'a str,
    pub retries: usize,
}

/// Whether two language names or codes refer to the same language.
pub fn same_language(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Parse a translation and require the original speaker sequence and no digits.
pub fn parse_translation(raw: &str, expected: &[u8]) -> Result<Transcript> {
    let transcript = parse_transcript_lenient(raw)?;
    let actual = transcript.speaker_sequence();
    if actual != expected {
        return Err(PanelistError::Parse(format!(
            "The translation has {} turns but the original has {}. Keep every <PersonN> tag exactly as in the original, in the same order.",
            actual.len(),
            expected.len()
        )));
    }
    let digits = spoken_digit_snippets(&transcript.render());
    if !digits.is_empty() {
        return Err(PanelistError::Parse(format!(
            "Numbers must be written as words in the target language. Found: {}",
            digits.join(", ")
        )));
    }
    Ok(transcript)
}

pub struct Translator {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    repair: RepairLoop,
    parse_retries: u32,
}

impl Translator {
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

    /// Translate without the repair pass.
    pub async fn translate_raw(
        &self,
        transcript: &Transcript,
        source_language: &str,
        target_language: &str,
    ) -> Result<Transcript> {
        let expected = transcript.speaker_sequence();
        let vars: HashMap<String, String> = [
            ("source_language".to_string(), source_language.to_string()),
            ("target_language".to_string(), target_language.to_string()),
            ("transcript".to_string(), transcript.render()),
        ]
        .into_iter()
        .collect();
        Chain::from_prompts("translate", self.llm.clone(), &self.prompts, &self.prompts.translate, &vars)
            .with_kind(ModelKind::Long)
            .with_temperature(0.3)
            .with_parse_retries(self.parse_retries)
            .invoke_with_repair(move |raw| parse_translation(raw, &expected))
            .await
            .map_err(|e| match e {
                PanelistError::Parse(msg) => {
                    PanelistError::Translation(format!("{} -> {}: {}", source_language, target_language, msg))
                }
                other => other,
            })
    }

    /// Translate and re-assert quality in the target language. Returns the
    /// input unchanged when the languages match.
    #[instrument(skip_all, fields(target = request.target_language))]
    pub async fn translate(&self, request: TranslateRequest<'_>) -> Result<Transcript> {
        let source_language = request.config.output_language.as_str();
        if same_language(source_language, request.target_language) {
            info!("Target language matches the source, skipping translation");
            return Ok(request.transcript.clone());
        }

        let translated = self
            .translate_raw(request.transcript, source_language, request.target_language)
            .await?;

        let config = request.config.with_language(request.target_language);
        let outcome = self
            .repair
            .run(RepairRequest {
                transcript: translated,
                content: request.content,
                config: &config,
                word_count: config.combined_target(request.article_count),
                previous_episodes: request.previous_episodes,
                retries: request.retries,
            })
            .await;
        info!(
            "Translated to {}: {} words",
            request.target_language,
            outcome.transcript.word_count()
        );
        Ok(outcome.transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlm, PASS};
    use crate::transcript::parse_transcript;

    fn english() -> Transcript {
        parse_transcript(
            "<Person1>Good morning, the plant hires three thousand people.</Person1>\
             <Person2>That is a lot of jobs.</Person2>\
             <Person1>It opens next spring.</Person1>\
             <Person2>Let's see how it goes.</Person2>",
        )
        .unwrap()
    }

    const FINNISH: &str = "<Person1>Hyvää huomenta, tehdas työllistää kolmetuhatta ihmistä.</Person1>\
        <Person2>Se on paljon työpaikkoja.</Person2>\
        <Person1>Se avataan ensi keväänä.</Person1>\
        <Person2>Katsotaan miten käy.</Person2>";

    fn request<'a>(t: &'a Transcript, target: &'a str, config: &'a ConversationConfig) -> TranslateRequest<'a> {
        TranslateRequest {
            transcript: t,
            target_language: target,
            content: "src",
            config,
            article_count: 1,
            previous_episodes: "",
            retries: 6,
        }
    }

    #[tokio::test]
    async fn test_translation_keeps_structure() {
        let llm = Arc::new(MockLlm::new());
        llm.push("translate", FINNISH);
        llm.respond_with("quality", |_| PASS.to_string());
        let config = ConversationConfig {
            word_count: None,
            ..Default::default()
        };
        let translator = Translator::new(llm.clone(), Arc::new(Prompts::default()));
        let original = english();

        let out = translator.translate(request(&original, "Finnish", &config)).await.unwrap();
        assert_eq!(out.len(), original.len());
        assert_eq!(out.speaker_sequence(), original.speaker_sequence());
        assert!(out.render().contains("kolmetuhatta"));
        assert!(spoken_digit_snippets(&out.render()).is_empty());

        let sent = &llm.requests("translate")[0];
        assert!(sent.system_prompt().contains("from English to Finnish"));
        let quality = &llm.requests("quality")[0];
        assert!(quality.system_prompt().contains("Finnish"));
    }

    #[tokio::test]
    async fn test_structure_mismatch_and_digits_are_repaired() {
        let llm = Arc::new(MockLlm::new());
        llm.push("translate", "<Person1>Hyvää huomenta.</Person1><Person2>Niin.</Person2>");
        llm.push(
            "translate",
            "<Person1>Tehdas työllistää 3000 ihmistä.</Person1><Person2>Paljon.</Person2>\
             <Person1>Keväällä.</Person1><Person2>Katsotaan.</Person2>",
        );
        llm.push("translate", FINNISH);
        llm.respond_with("quality", |_| PASS.to_string());
        let config = ConversationConfig {
            word_count: None,
            ..Default::default()
        };
        let translator = Translator::new(llm.clone(), Arc::new(Prompts::default()));
        let original = english();

        let out = translator.translate(request(&original, "Finnish", &config)).await.unwrap();
        assert_eq!(out.speaker_sequence(), original.speaker_sequence());
        let requests = llm.requests("translate");
        assert_eq!(requests.len(), 3);
        assert!(requests[2].user_prompt().contains("3000"));
    }

    #[tokio::test]
    async fn test_same_language_is_skipped() {
        let llm = Arc::new(MockLlm::new());
        let config = ConversationConfig::default();
        let translator = Translator::new(llm.clone(), Arc::new(Prompts::default()));
        let original = english();

        let out = translator.translate(request(&original, "english", &config)).await.unwrap();
        assert_eq!(out, original);
        assert!(llm.tags().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_translation_is_an_error() {
        let llm = Arc::new(MockLlm::new());
        llm.respond_with("translate", |_| "<Person1>Vain yksi.</Person1>".to_string());
        let config = ConversationConfig::default();
        let translator = Translator::new(llm.clone(), Arc::new(Prompts::default())).with_parse_retries(1);

        let err = translator
            .translate(request(&english(), "Finnish", &config))
            .await
            .unwrap_err();
        assert!(matches!(err, PanelistError::Translation(_)));
        assert_eq!(llm.count("translate"), 2);
    }
}
