//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// oq - durable offline operation queue
#[derive(Parser, Debug)]
#[command(name = "oq", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.oq/data/queue.db)
    #[arg(long, global = true, env = "OQ_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "OQ_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON (for scripting)
    #[arg(long, alias = "robot", global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue an operation for later replay
    Enqueue(EnqueueArgs),

    /// List queued operations (oldest first)
    List(ListArgs),

    /// Show one operation
    Show {
        /// Operation ID
        id: String,
    },

    /// Remove a pending or failed operation
    Cancel {
        /// Operation ID
        id: String,
    },

    /// Replay queued operations against the configured endpoint
    Sync,

    /// Retry a failed operation with a fresh attempt budget
    Retry {
        /// Operation ID
        id: String,
    },

    /// Show queue depth and sync state
    Status,

    /// Delete completed operations
    Purge {
        /// Also delete operations still inside the grace period
        #[arg(long)]
        all: bool,
    },

    /// Monitor connectivity and sync automatically until interrupted
    Watch(WatchArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Operation type (photo-capture, check-in, content-create, ...)
    #[arg(value_name = "TYPE")]
    pub op_type: String,

    /// JSON payload, or `-` to read it from stdin
    #[arg(default_value = "{}")]
    pub payload: String,

    /// Owning user (default: OQ_USER or config)
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter by status (pending, syncing, completed, failed)
    #[arg(short, long)]
    pub status: Option<String>,

    /// Filter by operation type
    #[arg(short = 't', long = "type")]
    pub op_type: Option<String>,

    /// Filter by user
    #[arg(long)]
    pub user: Option<String>,

    /// Maximum number of operations to show
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Probe interval in milliseconds (default: sample_interval_ms from config)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Assume the connection is online instead of probing
    #[arg(long)]
    pub assume_online: bool,
}
