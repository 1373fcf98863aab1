//! CLI command implementations.

mod config;
mod fetch;
mod generate;
mod resolve;
mod schedule;

pub use config::run_config;
pub use fetch::run_fetch;
pub use generate::{build_request, run_generate, GenerateArgs};
pub use resolve::run_resolve;
pub use schedule::run_schedule;
