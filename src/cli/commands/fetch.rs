//! Fetch command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::feeds::{feed_http_client, fetch_all, FeedConfigs};
use anyhow::{Context, Result};

/// Run the fetch command.
pub async fn run_fetch(request: Option<&str>, limit: usize, settings: Settings) -> Result<()> {
    let feeds: FeedConfigs = match request {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing feed configs in {}", path))?
        }
        None => settings.feeds.clone(),
    };
    if feeds.is_empty() {
        Output::warning("No feeds configured. Add [feeds] to the config file or pass --request.");
        return Ok(());
    }

    let http = feed_http_client(&settings.browser.user_agent)?;
    let spinner = Output::spinner("Fetching feeds...");
    let sources = fetch_all(&feeds.adapters(&http)).await;
    spinner.finish_and_clear();

    Output::header(&format!("{} items", sources.len()));
    for source in sources.iter().take(limit) {
        Output::source_item(&source.title, &source.source, &source.original_url);
    }
    if sources.len() > limit {
        Output::info(&format!("... and {} more", sources.len() - limit));
    }
    Ok(())
}
