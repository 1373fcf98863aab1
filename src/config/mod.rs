//! Configuration module for Panelist.
//!
//! Handles loading application settings, prompt templates and the conversation contract.

mod conversation;
mod prompts;
mod settings;

pub use conversation::{merge_json, ConversationConfig, HostProfile, IntroMode, PersonRoles};
pub use prompts::{ChainPrompts, Prompts, FILLER_RULES, FORMAT_RULES, TTS_RULES};
pub use settings::{
    BrowserSettings, GeneralSettings, LlmProvider, LlmSettings, PipelineSettings, PromptSettings,
    Settings, StorageSettings,
};
