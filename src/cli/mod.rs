pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bookwatch")]
#[command(about = "Watch serialized books for new episodes and download them", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/bookwatch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start tracking a book
    Add {
        /// Numeric book id
        work: String,
        /// Name to store instead of the one derived from the episode title
        #[arg(long)]
        title: Option<String>,
        /// Episode identifier to start searching from
        #[arg(long)]
        from: Option<String>,
    },
    /// Store every episode published since the last known one
    Sync {
        /// Numeric book id
        work: String,
    },
    /// Find the newest published episode without storing anything
    Newest {
        /// Numeric book id
        work: String,
        /// Episode identifier to start searching from
        #[arg(long)]
        from: Option<String>,
    },
    /// Wait for the next episode of each book and download it
    Watch {
        /// Numeric book ids
        #[arg(required = true)]
        works: Vec<String>,
        /// Watch for the episode after this identifier (single book only)
        #[arg(long)]
        after: Option<String>,
        /// Server segment override (single book only)
        #[arg(long)]
        segment: Option<String>,
        /// Poll interval (e.g., "30s", "10m", "1h")
        #[arg(short, long)]
        interval: Option<String>,
        /// Give up after this many polls
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Keep watching for later episodes after each download
        #[arg(long)]
        follow: bool,
    },
    /// Download a published episode
    Download {
        /// Numeric book id
        work: String,
        /// Episode identifier
        episode: String,
        /// Highest page number to try
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// List tracked books
    List,
}
