use std::path::PathBuf;

use clap::{Parser, Subcommand};
use streak_core::{SyncOptions, Year};

#[derive(Debug, Parser)]
#[command(name = "streak", version, about = "Contribution calendar cache and sync")]
pub struct Cli {
    /// Path to the TOML config (falls back to STREAK_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Synchronize one or more years and print each result
    Sync {
        /// Years to synchronize
        #[arg(required = true)]
        years: Vec<Year>,
        /// Bypass the cache and fetch from the origin
        #[arg(long)]
        force: bool,
        /// Serve aging entries immediately and refresh in the background
        #[arg(long)]
        allow_stale: bool,
        /// Override the retry budget
        #[arg(long)]
        max_retries: Option<u32>,
        /// Override the per-fetch timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print freshness, age and size of every cached year
    Status,
    /// Drop cached years (all of them when none are given)
    Invalidate {
        years: Vec<Year>,
    },
}

impl Command {
    /// Per-call options for `sync`; defaults for anything else.
    pub fn sync_options(&self) -> SyncOptions {
        let Command::Sync {
            force,
            allow_stale,
            max_retries,
            timeout_ms,
            ..
        } = self
        else {
            return SyncOptions::default();
        };

        let mut options = SyncOptions::new();
        if *force {
            options = options.force_refresh();
        }
        if *allow_stale {
            options = options.allow_stale();
        }
        if let Some(retries) = max_retries {
            options = options.with_max_retries(*retries);
        }
        if let Some(ms) = timeout_ms {
            options = options.with_timeout(std::time::Duration::from_millis(*ms));
        }
        options
    }
}
