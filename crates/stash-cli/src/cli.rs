use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stash")]
#[command(about = "Edit remotely stored campaigns without losing work")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local write queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Base URL of the campaign API
    #[arg(
        long,
        global = true,
        env = "STASH_API_URL",
        default_value = "http://127.0.0.1:8787",
        value_name = "URL"
    )]
    pub api_url: String,

    /// Treat the store as unreachable; saves go straight to the queue
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a campaign from a JSON payload
    #[command(alias = "new")]
    Create {
        /// JSON file to read (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Show the committed campaign
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a payload once against a known revision
    Save {
        id: String,
        /// Revision the payload was edited from
        #[arg(short, long)]
        revision: i64,
        /// JSON file to read (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Autosave a local JSON file into a campaign until interrupted
    Watch {
        id: String,
        /// JSON file mirrored into the campaign
        #[arg(short, long, value_name = "PATH")]
        file: PathBuf,
        /// Start from this committed revision instead of fetching the campaign
        #[arg(short, long)]
        revision: Option<i64>,
        /// How often to check the file for changes
        #[arg(long, default_value = "500", value_name = "MS")]
        poll_ms: u64,
    },
    /// List saves waiting in the local queue
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recovery drafts
    Drafts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the recovery draft of one campaign
    Draft { id: String },
    /// Replay the local queue against the store
    Drain,
    /// Settle a revision conflict
    Resolve {
        id: String,
        #[command(subcommand)]
        strategy: ResolveStrategy,
    },
    /// Show queue size, drafts and store reachability
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ResolveStrategy {
    /// Drop local queued edits and keep the committed campaign
    Reload,
    /// Write a payload over whatever is committed
    Overwrite {
        /// JSON file to read (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
}
