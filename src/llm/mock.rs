//! Scripted LLM for tests. Responses are routed by chain tag.

use super::{CompletionRequest, LlmClient};
use crate::error::{PanelistError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&CompletionRequest) -> String + Send + Sync>;

/// Queued responses per tag, then a fallback handler per tag.
#[derive(Default)]
pub struct MockLlm {
    queued: Mutex<HashMap<String, VecDeque<String>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `tag`.
    pub fn push(&self, tag: &str, response: impl Into<String>) {
        self.queued
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_default()
            .push_back(response.into());
    }

    /// Answer every unqueued call for `tag` with `handler`.
    pub fn respond_with(
        &self,
        tag: &str,
        handler: impl Fn(&CompletionRequest) -> String + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(tag.to_string(), Arc::new(handler));
    }

    /// Every request received for `tag`, in order.
    pub fn requests(&self, tag: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.tag == tag)
            .cloned()
            .collect()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.requests(tag).len()
    }

    /// Every tag called, in order.
    pub fn tags(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.tag.clone()).collect()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.tag)
            .and_then(|q| q.pop_front());
        if let Some(response) = queued {
            return Ok(response);
        }

        let handler = self.handlers.lock().unwrap().get(&request.tag).cloned();
        match handler {
            Some(handler) => Ok(handler(request)),
            None => Err(PanelistError::Llm(format!(
                "no scripted response for '{}'",
                request.tag
            ))),
        }
    }
}

/// A valid dialogue of `turns` turns with roughly `words` words in total.
pub fn dialogue(words: usize, turns: usize) -> String {
    let turns = turns.max(2) & !1;
    let per_turn = (words / turns).max(1);
    (0..turns)
        .map(|i| {
            let speaker = i % 2 + 1;
            let text = vec!["word"; per_turn].join(" ");
            format!("<Person{0}>{1}</Person{0}>", speaker, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A passing verifier verdict.
pub const PASS: &str = r#"{"pass_test": true, "issues": []}"#;
