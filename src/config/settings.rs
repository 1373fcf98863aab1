//! Configuration settings for Panelist.

use super::conversation::ConversationConfig;
use crate::feeds::FeedConfigs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub llm: LlmSettings,
    pub pipeline: PipelineSettings,
    pub browser: BrowserSettings,
    pub storage: StorageSettings,
    /// Default conversation contract, overridden per panel and per request.
    pub conversation: ConversationConfig,
    /// Feeds used when a request names none.
    pub feeds: FeedConfigs,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.panelist".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// LLM provider. Every provider is reached through an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum LlmProvider {
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "groq")]
    Groq,
    #[serde(rename = "bedrock")]
    Bedrock,
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    #[serde(rename = "azure_ml")]
    AzureMl,
    #[serde(rename = "gemini")]
    Gemini,
}

impl LlmProvider {
    /// Default OpenAI-compatible base URL, if the provider has a fixed one.
    pub fn default_api_base(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => Some("http://localhost:11434/v1"),
            LlmProvider::Groq => Some("https://api.groq.com/openai/v1"),
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::Anthropic => Some("https://api.anthropic.com/v1"),
            LlmProvider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            LlmProvider::Bedrock | LlmProvider::AzureOpenAi | LlmProvider::AzureMl => None,
        }
    }

    /// Environment variable holding the API key.
    pub fn default_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Groq => Some("GROQ_API_KEY"),
            LlmProvider::Bedrock => Some("BEDROCK_API_KEY"),
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            LlmProvider::AzureMl => Some("AZURE_ML_API_KEY"),
            LlmProvider::Gemini => Some("GEMINI_API_KEY"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "groq" => Ok(LlmProvider::Groq),
            "bedrock" => Ok(LlmProvider::Bedrock),
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "azure_openai" | "azure" => Ok(LlmProvider::AzureOpenAi),
            "azure_ml" => Ok(LlmProvider::AzureMl),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Groq => "groq",
            LlmProvider::Bedrock => "bedrock",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::AzureOpenAi => "azure_openai",
            LlmProvider::AzureMl => "azure_ml",
            LlmProvider::Gemini => "gemini",
        };
        write!(f, "{}", name)
    }
}

/// LLM transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    /// Model for dialogue writing and rewriting.
    pub model: String,
    /// Model for JSON-producing chains (grouping, verifier, summary, validator).
    pub structured_model: String,
    /// Model for long inputs (formatter, combined rewrites).
    pub long_model: String,
    /// Override for the provider's base URL. Required for bedrock and azure_ml gateways.
    pub api_base: Option<String>,
    /// Override for the API key environment variable.
    pub api_key_env: Option<String>,
    /// API version (Azure OpenAI only).
    pub api_version: Option<String>,
    /// Deployment id (Azure OpenAI only). Defaults to the model name.
    pub deployment_id: Option<String>,
    /// Temperature for structured chains. Writing chains use the conversation creativity.
    pub temperature: f32,
    /// Request spacing per provider. Zero disables the limiter.
    pub requests_per_minute: u32,
    /// Re-prompts with the parse error text before a chain gives up.
    pub parse_retries: u32,
    /// Transparent retries on provider rate-limit errors.
    pub rate_limit_retries: u32,
    /// HTTP timeout for a single completion.
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model: "gpt-4.1".to_string(),
            structured_model: "gpt-4.1-mini".to_string(),
            long_model: "gpt-4.1-mini".to_string(),
            api_base: None,
            api_key_env: None,
            api_version: None,
            deployment_id: None,
            temperature: 0.2,
            requests_per_minute: 120,
            parse_retries: 5,
            rate_limit_retries: 6,
            timeout_secs: 300,
        }
    }
}

impl LlmSettings {
    /// The API key environment variable for the configured provider.
    pub fn key_env(&self) -> Option<String> {
        self.api_key_env
            .clone()
            .or_else(|| self.provider.default_key_env().map(str::to_string))
    }

    /// Base URL, explicit or the provider default.
    pub fn base_url(&self) -> Option<String> {
        self.api_base
            .clone()
            .or_else(|| self.provider.default_api_base().map(str::to_string))
    }
}

/// Pipeline budgets and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum sources resolved per episode.
    pub max_items: usize,
    /// Minimum number of segments the grouping step should produce.
    pub min_groups: usize,
    /// Maximum source ids per group.
    pub max_ids_per_group: usize,
    /// Repair budget per segment in fan-out.
    pub segment_retries: usize,
    /// Repair budget for a single-segment show.
    pub single_retries: usize,
    /// Repair budget for the combined show.
    pub combined_retries: usize,
    /// Repair budget after translation.
    pub translation_retries: usize,
    /// Attempts on empty or wrapped writer output.
    pub writer_retries: usize,
    /// Floor applied to the length target.
    pub min_target_words: usize,
    /// Relative tolerance around the length target.
    pub length_tolerance: f64,
    pub ingest_timeout_secs: u64,
    pub segment_timeout_secs: u64,
    pub combine_timeout_secs: u64,
    /// Worker pool size for fan-out.
    pub workers: usize,
    /// Completed episodes loaded as prior context.
    pub history_episodes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_items: 10,
            min_groups: 1,
            max_ids_per_group: 5,
            segment_retries: 2,
            single_retries: 6,
            combined_retries: 6,
            translation_retries: 6,
            writer_retries: 3,
            min_target_words: 300,
            length_tolerance: 0.25,
            ingest_timeout_secs: 15 * 60,
            segment_timeout_secs: 30 * 60,
            combine_timeout_secs: 30 * 60,
            workers: 4,
            history_episodes: 5,
        }
    }
}

/// Headless browser settings for link resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Use a headless browser. When false, pages are fetched over plain HTTP.
    pub enabled: bool,
    pub headless: bool,
    /// Navigation timeout in seconds.
    pub timeout_secs: u64,
    /// Extra Chrome command-line arguments.
    pub chrome_args: Vec<String>,
    /// Connect to an existing browser over CDP instead of launching one.
    pub remote_url: Option<String>,
    /// Download, resize and embed article images.
    pub fetch_images: bool,
    pub user_agent: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: true,
            timeout_secs: 30,
            chrome_args: vec!["--no-sandbox".to_string(), "--disable-gpu".to_string()],
            remote_url: None,
            fetch_images: false,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path to the SQLite database holding sources and panel rows.
    pub sqlite_path: String,
    /// Root directory of the local blob store.
    pub blob_dir: String,
    /// Bucket used when a request names none.
    pub default_bucket: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.panelist/panelist.db".to_string(),
            blob_dir: "~/.panelist/blobs".to_string(),
            default_bucket: "transcripts".to_string(),
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PanelistError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("panelist")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.sqlite_path)
    }

    /// Get the expanded blob root.
    pub fn blob_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.blob_dir)
    }
}
