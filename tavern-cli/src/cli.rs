//! CLI parser.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tavern")]
#[command(about = "Conversation memory engine: admin and inspection", long_about = None)]
#[command(version)]
pub struct Cli {
    /// SQLite database path; overrides DATABASE_URL.
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Also append logs to this file; overrides LOG_FILE.
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Create the database schema if it does not exist.
    Init,
    /// Create a conversation, optionally seeded with a JSON state file.
    Create {
        label: String,
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// List conversations, newest first.
    List,
    /// Delete a conversation and everything it owns.
    Delete { conversation: String },
    /// Print the conversation's current world state.
    State { conversation: String },
    /// Print messages in sequence order.
    History {
        conversation: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },
    /// Print memory nodes whose timeline anchor lies between the tags.
    Timeline {
        conversation: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Print the memory spine used for prompt assembly.
    Spine { conversation: String },
    /// Print the world state at or before a message.
    Rollback { conversation: String, message: i64 },
    /// Delete every message after the given one and restore the state at it.
    Truncate { conversation: String, message: i64 },
    /// Resolve rules for a scope value and tag set, grouped by category.
    Rules {
        scope: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print the strongest relationships of an entity.
    Relationships {
        conversation: String,
        entity: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Register rule fragments from a JSON array file; all or none are imported.
    ImportRules { file: PathBuf },
}
