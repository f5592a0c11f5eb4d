use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stockcount")]
#[command(about = "Offline stock-count queue, replay and scanning from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local sync database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or edit the offline write queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Record stock counts
    Count {
        #[command(subcommand)]
        command: CountCommands,
    },
    /// Review mutations the backend refused to replay
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Run one manual flush pass
    Flush {
        /// Treat the device as offline (nothing is sent)
        #[arg(long)]
        offline: bool,
    },
    /// Run the flush scheduler until Ctrl-C
    ///
    /// Type `online`, `offline`, `flush` or `foreground` on stdin to drive it.
    Watch {
        /// Start in offline mode
        #[arg(long)]
        offline: bool,
    },
    /// Feed `CODE [T_MS]` lines from stdin through the scan filter
    Scan {
        /// Enqueue a count line for each accepted scan in this session
        #[arg(long, value_name = "SESSION")]
        session: Option<String>,
    },
    /// Show pending mutations and open conflicts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending mutations in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enqueue a raw mutation
    Add {
        /// HTTP method (POST, PUT, PATCH, DELETE)
        #[arg(long)]
        method: String,
        /// Backend path, e.g. /sessions/S1/lines
        #[arg(long)]
        path: String,
        /// JSON request body (defaults to `{}`)
        #[arg(long)]
        payload: Option<String>,
    },
    /// Remove a pending mutation by id
    Remove {
        /// Mutation ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CountCommands {
    /// Enqueue a count line for an item
    Add {
        /// Count session ID
        #[arg(long)]
        session: String,
        /// Item barcode or SKU
        #[arg(long)]
        item: String,
        /// Counted quantity
        #[arg(long)]
        quantity: f64,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List open conflicts, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dismiss a conflict as acceptable
    Dismiss {
        /// Conflict (mutation) ID
        id: String,
    },
    /// Mark a conflict as reconciled out-of-band
    Resolve {
        /// Conflict (mutation) ID
        id: String,
    },
}
