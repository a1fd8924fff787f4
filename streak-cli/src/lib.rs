//! STREAK CLI - operator front end for the contribution-calendar cache.
//!
//! Wires an LMDB-backed [`streak_storage::YearCache`], the HTTP origin and the
//! optional edge tier into a [`streak_sync::SyncOrchestrator`], then runs one
//! command and reports JSON on stdout.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod telemetry;

pub use cli::{Cli, Command};
pub use commands::{run_command, Outcome};
pub use config::CliConfig;
pub use error::{CliError, CliResult};
