//! Invoke-with-repair: call the model, parse, and re-prompt with the parse error.

use super::{ChatMessage, CompletionRequest, LlmClient, ModelKind};
use crate::config::{ChainPrompts, Prompts};
use crate::error::{PanelistError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("Invalid regex"));

/// Default number of re-prompts after a parse failure.
pub const DEFAULT_PARSE_RETRIES: u32 = 5;

/// One rendered prompt bound to a client.
pub struct Chain {
    name: String,
    client: Arc<dyn LlmClient>,
    system: String,
    user: String,
    kind: ModelKind,
    temperature: f32,
    json_mode: bool,
    parse_retries: u32,
}

impl Chain {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn LlmClient>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            system: system.into(),
            user: user.into(),
            kind: ModelKind::Writer,
            temperature: 0.7,
            json_mode: false,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    /// Render a prompt group with the given variables.
    pub fn from_prompts(
        name: &str,
        client: Arc<dyn LlmClient>,
        prompts: &Prompts,
        chain: &ChainPrompts,
        vars: &HashMap<String, String>,
    ) -> Self {
        Self::new(
            name,
            client,
            prompts.render_with_custom(&chain.system, vars),
            prompts.render_with_custom(&chain.user, vars),
        )
    }

    pub fn with_kind(mut self, kind: ModelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    /// Request a JSON object and use the structured model.
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self.kind = ModelKind::Structured;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn user_prompt(&self) -> &str {
        &self.user
    }

    fn request(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            tag: self.name.clone(),
            messages,
            kind: self.kind,
            temperature: self.temperature,
            json_mode: self.json_mode,
        }
    }

    /// One call, no parsing. Empty output is an error.
    pub async fn invoke_text(&self) -> Result<String> {
        let request = self.request(vec![
            ChatMessage::system(&self.system),
            ChatMessage::user(&self.user),
        ]);
        let raw = self.client.complete(&request).await?;
        if raw.trim().is_empty() {
            return Err(PanelistError::Generation(format!("{}: empty response", self.name)));
        }
        Ok(raw)
    }

    /// Call the model and parse its answer. Recoverable parse errors are sent back
    /// to the model, which gets `parse_retries` chances to correct itself.
    pub async fn invoke_with_repair<T, F>(&self, parse: F) -> Result<T>
    where
        F: Fn(&str) -> Result<T> + Send + Sync,
        T: Send,
    {
        let mut messages = vec![
            ChatMessage::system(&self.system),
            ChatMessage::user(&self.user),
        ];
        let mut attempt = 0;
        loop {
            let raw = self.client.complete(&self.request(messages.clone())).await?;
            match parse(&raw) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable_parse() && attempt < self.parse_retries => {
                    attempt += 1;
                    debug!("{}: parse failed (attempt {}): {}", self.name, attempt, e);
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(format!(
                        "Your previous answer could not be used: {}\nReturn the complete answer again in the required format.",
                        e
                    )));
                }
                Err(e) => {
                    if e.is_recoverable_parse() {
                        warn!("{}: giving up after {} repair attempts: {}", self.name, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Call the model and deserialize a JSON object answer.
    pub async fn invoke_json<T: DeserializeOwned + Send>(&self) -> Result<T> {
        self.invoke_with_repair(parse_json::<T>).await
    }
}

/// Parse JSON from a model answer, tolerating code fences and surrounding prose.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = match JSON_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw,
    };
    let body = body.trim();
    let candidate = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => body,
    };
    serde_json::from_str(candidate)
        .map_err(|e| PanelistError::Parse(format!("Invalid JSON for the requested schema: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlm;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
    }

    #[test]
    fn test_parse_json_tolerates_fences_and_prose() {
        let v: Verdict = parse_json("Here you go:\n```json\n{\"ok\": true}\n```").unwrap();
        assert_eq!(v, Verdict { ok: true });
        let v: Verdict = parse_json("Result: {\"ok\": false} hope that helps").unwrap();
        assert_eq!(v, Verdict { ok: false });
        assert!(parse_json::<Verdict>("no json here").unwrap_err().is_recoverable_parse());
    }

    #[tokio::test]
    async fn test_repair_sends_error_back() {
        let llm = Arc::new(MockLlm::new());
        llm.push("verdict", "not json");
        llm.push("verdict", "{\"ok\": true}");

        let chain = Chain::new("verdict", llm.clone(), "sys", "judge this").json();
        let v: Verdict = chain.invoke_json().await.unwrap();
        assert!(v.ok);

        let requests = llm.requests("verdict");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert!(requests[1].user_prompt().contains("could not be used"));
        assert!(requests[1].json_mode);
    }

    #[tokio::test]
    async fn test_repair_budget_exhausted() {
        let llm = Arc::new(MockLlm::new());
        llm.respond_with("verdict", |_| "still not json".to_string());

        let chain = Chain::new("verdict", llm.clone(), "sys", "judge").with_parse_retries(2);
        let result: Result<Verdict> = chain.invoke_json().await;
        assert!(result.is_err());
        assert_eq!(llm.count("verdict"), 3);
    }

    #[tokio::test]
    async fn test_empty_text_is_generation_error() {
        let llm = Arc::new(MockLlm::new());
        llm.push("bridge", "   ");
        let chain = Chain::new("bridge", llm, "sys", "user");
        assert!(matches!(
            chain.invoke_text().await,
            Err(PanelistError::Generation(_))
        ));
    }
}
