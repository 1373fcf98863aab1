//! OpenAI-compatible client configuration for every supported provider.

use crate::config::{LlmProvider, LlmSettings};
use crate::error::{PanelistError, Result};
use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::Client;
use std::time::Duration;

/// Default timeout for chat requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Build the HTTP client shared by LLM calls.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Wrap a provider config in a client with the configured timeout.
pub fn create_client_with_timeout<C: Config>(config: C, timeout: Duration) -> Result<Client<C>> {
    Ok(Client::with_config(config).with_http_client(http_client(timeout)?))
}

fn api_key(settings: &LlmSettings) -> Result<String> {
    match settings.key_env() {
        Some(var) => std::env::var(&var).map_err(|_| {
            PanelistError::Config(format!(
                "{} is not set (required for provider {})",
                var, settings.provider
            ))
        }),
        // Ollama ignores the key but the client still sends one.
        None => Ok("ollama".to_string()),
    }
}

/// OpenAI-style config for every provider except Azure OpenAI.
pub fn openai_config(settings: &LlmSettings) -> Result<OpenAIConfig> {
    if settings.provider == LlmProvider::AzureOpenAi {
        return Err(PanelistError::Config(
            "azure_openai uses an Azure config, not an OpenAI one".to_string(),
        ));
    }
    let base = settings.base_url().ok_or_else(|| {
        PanelistError::Config(format!(
            "llm.api_base is required for provider {}",
            settings.provider
        ))
    })?;
    Ok(OpenAIConfig::new()
        .with_api_base(base.trim_end_matches('/'))
        .with_api_key(api_key(settings)?))
}

/// Azure OpenAI config. The deployment id defaults to the model name.
pub fn azure_config(settings: &LlmSettings, model: &str) -> Result<AzureConfig> {
    let base = settings.api_base.clone().ok_or_else(|| {
        PanelistError::Config("llm.api_base is required for azure_openai".to_string())
    })?;
    Ok(AzureConfig::new()
        .with_api_base(base.trim_end_matches('/'))
        .with_api_key(api_key(settings)?)
        .with_deployment_id(settings.deployment_id.clone().unwrap_or_else(|| model.to_string()))
        .with_api_version(
            settings
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_needs_no_key() {
        let settings = LlmSettings {
            provider: LlmProvider::Ollama,
            ..Default::default()
        };
        let config = openai_config(&settings).unwrap();
        assert_eq!(config.api_base(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_gateway_providers_require_base() {
        let settings = LlmSettings {
            provider: LlmProvider::Bedrock,
            api_key_env: Some("PANELIST_TEST_UNSET_KEY".to_string()),
            ..Default::default()
        };
        assert!(matches!(openai_config(&settings), Err(PanelistError::Config(_))));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let settings = LlmSettings {
            provider: LlmProvider::Groq,
            api_key_env: Some("PANELIST_TEST_DEFINITELY_UNSET".to_string()),
            ..Default::default()
        };
        let err = openai_config(&settings).unwrap_err();
        assert!(err.to_string().contains("PANELIST_TEST_DEFINITELY_UNSET"));
    }
}
