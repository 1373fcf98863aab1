//! CLI module for Panelist.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Panelist - AI news podcast transcripts
///
/// Turns news feeds, article URLs and free text into a two-host podcast
/// transcript, with translations and recurring episodes.
#[derive(Parser, Debug)]
#[command(name = "panelist")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "PANELIST_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate one episode transcript
    Generate {
        /// JSON file with a full generation request. Flags override its fields.
        #[arg(short, long)]
        request: Option<String>,

        /// Panel the episode belongs to
        #[arg(short, long)]
        panel: Option<String>,

        /// Article URLs to include
        #[arg(short, long = "url")]
        urls: Vec<String>,

        /// File whose text is used as an extra source
        #[arg(long)]
        text: Option<String>,

        /// Extra output languages
        #[arg(short, long = "language")]
        languages: Vec<String>,

        /// Target word count per article
        #[arg(short, long)]
        words: Option<usize>,

        /// Minimum number of segments
        #[arg(long)]
        segments: Option<usize>,

        /// Scale the length with the number of articles
        #[arg(long)]
        longform: bool,

        /// Editorial guidance for sorting the news
        #[arg(long)]
        guidance: Option<String>,

        /// Cron expression for recurring episodes (e.g. "0 8 * * *")
        #[arg(long)]
        cron: Option<String>,

        /// Write the transcript to a file as well
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List items from the configured feeds (or the feeds in a request file)
    Fetch {
        /// JSON file with feed configs
        #[arg(short, long)]
        request: Option<String>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "30")]
        limit: usize,
    },

    /// Resolve a single URL and print the cleaned article
    Resolve {
        /// Article URL
        url: String,
    },

    /// Launch recurring generations that are due
    Schedule {
        /// Keep running and check on every tick
        #[arg(short, long)]
        watch: bool,

        /// Seconds between ticks in watch mode
        #[arg(long, default_value = "60")]
        interval: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
