use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "driftvault",
    about = "Local-first chat session store with best-effort cloud snapshot sync",
    version
)]
pub struct Cli {
    /// Verbose (debug-level) logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Use a specific config file instead of the default location.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Inspect and manage chat sessions.
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Write all sessions to a snapshot file.
    Export {
        /// Destination .json file.
        file: PathBuf,
    },
    /// Replace all local sessions from a snapshot file.
    Import {
        /// Source .json file.
        file: PathBuf,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Reconcile the local store with the cloud snapshot.
    Sync {
        /// Log failures instead of reporting them (background mode).
        #[arg(long)]
        quiet: bool,
    },
    /// Scan for orphaned session content and rebuild index entries.
    Recover,
    /// Manage the cloud connection.
    Cloud {
        #[command(subcommand)]
        command: CloudCommand,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions, most recently updated first.
    List,
    /// Create a new session.
    New,
    /// Duplicate an existing session.
    Duplicate { id: String },
    /// Delete a session and its content.
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum CloudCommand {
    /// Exchange an authorization code for cloud credentials.
    Connect { auth_code: String },
    /// Drop stored cloud credentials.
    Disconnect,
    /// Show whether a cloud credential is held.
    Status,
}
