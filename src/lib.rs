//! Panelist - AI news podcast transcripts
//!
//! Turns news feeds, article URLs and free text into a two-host podcast
//! transcript, checks and repairs it, then translates it and hands it to an
//! audio stage.
//!
//! # Architecture
//!
//! - `feeds` - news feed adapters (Google News, Yle, TechCrunch, Hacker News, URL lists)
//! - `resolver` - page fetching, consent walls, article extraction and validation
//! - `store` - source, panel and blob persistence
//! - `grouping` - sorting sources into ordered segments
//! - `writer` - segment dialogue generation
//! - `repair` - length and quality repair loop
//! - `combiner` - intro, bridges and conclusion
//! - `summarizer` - episode title, description and subjects
//! - `translator` - translation with a repair pass
//! - `orchestrator` - the generation pipeline
//! - `scheduler` - recurring generations from cron expressions
//!
//! # Example
//!
//! ```rust,no_run
//! use panelist::config::Settings;
//! use panelist::orchestrator::{GenerationRequest, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let request: GenerationRequest = serde_json::from_value(serde_json::json!({
//!         "panel_id": "tech",
//!         "input_source": "https://example.com/article",
//!         "languages": ["Finnish"]
//!     }))?;
//!     let outcome = orchestrator.generate(&request).await?;
//!     println!("{} words", outcome.text.word_count());
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod combiner;
pub mod config;
pub mod error;
pub mod feeds;
pub mod grouping;
pub mod llm;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod repair;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod summarizer;
pub mod tasks;
pub mod transcript;
pub mod translator;
pub mod writer;

pub use error::{PanelistError, Result};
