//! Chat completions over any OpenAI-compatible endpoint.

use super::rate_limit::{is_rate_limit_message, parse_retry_delay};
use super::{ChatMessage, CompletionRequest, LlmClient, Role};
use crate::error::{PanelistError, Result};
use async_openai::config::Config;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

/// One model at one temperature on one provider.
pub struct OpenAiChat<C: Config> {
    client: Client<C>,
    model: String,
}

impl<C: Config> OpenAiChat<C> {
    pub fn new(client: Client<C>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let build_err = |e: async_openai::error::OpenAIError| PanelistError::Llm(e.to_string());
    Ok(match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(build_err)?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(build_err)?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(message.content.clone())
            .build()
            .map_err(build_err)?
            .into(),
    })
}

/// Map a provider error, recognizing rate limits and quota exhaustion.
fn map_api_error(error: async_openai::error::OpenAIError) -> PanelistError {
    let message = error.to_string();
    if is_rate_limit_message(&message) {
        PanelistError::RateLimited {
            retry_after: parse_retry_delay(&message),
            message,
        }
    } else {
        PanelistError::Llm(format!("Completion failed: {}", message))
    }
}

#[async_trait]
impl<C: Config + Send + Sync + 'static> LlmClient for OpenAiChat<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let messages = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature);
        if request.json_mode {
            builder.response_format(ResponseFormat::JsonObject);
        }
        let chat_request = builder
            .build()
            .map_err(|e| PanelistError::Llm(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_api_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| PanelistError::Llm("Empty response from LLM".to_string()))?
            .clone();

        debug!(tag = %request.tag, model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
