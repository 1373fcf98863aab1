//! LLM access: a provider-neutral client trait, the pooled OpenAI-compatible
//! implementation, rate limiting, and the parse-and-repair chain every pipeline
//! stage calls through.

mod chain;
#[cfg(test)]
pub mod mock;
mod openai_chat;
mod pool;
mod rate_limit;

pub use chain::{parse_json, Chain, DEFAULT_PARSE_RETRIES};
pub use openai_chat::OpenAiChat;
pub use pool::{ClientPool, PoolKey};
pub use rate_limit::{
    is_rate_limit_message, parse_retry_delay, random_backoff, retry_rate_limited, RateLimiter,
};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which configured model a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Dialogue writing and rewriting.
    Writer,
    /// JSON-producing chains.
    Structured,
    /// Long inputs.
    Long,
}

/// A single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Name of the calling chain, for logging and test routing.
    pub tag: String,
    pub messages: Vec<ChatMessage>,
    pub kind: ModelKind,
    pub temperature: f32,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// The last user message, which carries the rendered prompt.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Trait for chat completion backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the assistant text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
