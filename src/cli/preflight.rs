//! Pre-flight checks before expensive operations.
//!
//! Validates configuration up front so a generation does not fail after
//! minutes of fetching and resolving.

use crate::config::{LlmProvider, LlmSettings};
use crate::error::{PanelistError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Generation and resolving call the LLM.
    Generate,
    /// Listing feed items needs nothing.
    Fetch,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, llm: &LlmSettings) -> Result<()> {
    match operation {
        Operation::Generate => check_api_key(llm, |name| std::env::var(name).ok()),
        Operation::Fetch => Ok(()),
    }
}

/// The provider's key variable must be set and non-empty. Ollama needs none.
fn check_api_key(llm: &LlmSettings, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if llm.provider == LlmProvider::Ollama {
        return Ok(());
    }
    let Some(name) = llm.key_env() else {
        return Ok(());
    };
    match lookup(&name) {
        Some(key) if !key.trim().is_empty() => Ok(()),
        Some(_) => Err(PanelistError::Config(format!(
            "{} is empty. Set it with: export {}='...'",
            name, name
        ))),
        None => Err(PanelistError::Config(format!(
            "{} not set. Set it with: export {}='...'",
            name, name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_has_no_requirements() {
        assert!(check(Operation::Fetch, &LlmSettings::default()).is_ok());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let llm = LlmSettings {
            provider: LlmProvider::Ollama,
            ..Default::default()
        };
        assert!(check_api_key(&llm, |_| None).is_ok());
    }

    #[test]
    fn test_missing_and_empty_keys() {
        let llm = LlmSettings {
            provider: LlmProvider::Groq,
            ..Default::default()
        };
        let missing = check_api_key(&llm, |_| None).unwrap_err();
        assert!(missing.to_string().contains("GROQ_API_KEY not set"));
        assert!(check_api_key(&llm, |_| Some(" ".to_string())).is_err());
        assert!(check_api_key(&llm, |_| Some("gsk-1".to_string())).is_ok());
    }

    #[test]
    fn test_custom_key_env() {
        let llm = LlmSettings {
            api_key_env: Some("MY_GATEWAY_KEY".to_string()),
            ..Default::default()
        };
        let err = check_api_key(&llm, |_| None).unwrap_err();
        assert!(err.to_string().contains("MY_GATEWAY_KEY"));
    }
}
