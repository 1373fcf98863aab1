//! Schedule command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;
use anyhow::Result;
use std::time::Duration;

/// Run the schedule command.
pub async fn run_schedule(watch: bool, interval: u64, settings: Settings) -> Result<()> {
    preflight::check(Operation::Generate, &settings.llm)?;
    let scheduler = Scheduler::new(Orchestrator::new(settings)?).with_tick(Duration::from_secs(interval.max(1)));

    if watch {
        Output::info(&format!("Watching recurring transcripts every {}s", interval.max(1)));
        scheduler.watch().await?;
        return Ok(());
    }

    let triggered = scheduler.tick(chrono::Utc::now()).await?;
    if triggered.is_empty() {
        Output::info("Nothing due");
    } else {
        Output::success(&format!("Ran {} recurring generation(s)", triggered.len()));
        for id in triggered {
            Output::kv("Template", &id.to_string());
        }
    }
    Ok(())
}
