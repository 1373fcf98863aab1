//! Resolve command implementation.

use crate::cli::output::content_preview;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the resolve command.
pub async fn run_resolve(url: &str, settings: Settings) -> Result<()> {
    preflight::check(Operation::Generate, &settings.llm)?;
    let orchestrator = Orchestrator::new(settings)?;

    let spinner = Output::spinner(&format!("Resolving {}", url));
    let result = orchestrator.resolver().resolve(url, None, None).await;
    spinner.finish_and_clear();

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            Output::error(&format!("Could not resolve {}: {}", url, e));
            return Err(e.into());
        }
    };

    Output::header(&result.title);
    Output::kv("URL", &result.resolved_url);
    if let Some(description) = &result.description {
        Output::kv("Description", &content_preview(description, 200));
    }
    if let Some(date) = result.publish_date {
        Output::kv("Published", &date.to_rfc3339());
    }
    if let Some(language) = &result.language {
        Output::kv("Language", language);
    }
    if !result.categories.is_empty() {
        Output::kv("Categories", &result.categories.join(", "));
    }
    println!("\n{}", result.human_readable_content);
    Ok(())
}
