//! STREAK CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use streak_cli::commands::run_command;
use streak_cli::telemetry::init_tracing;
use streak_cli::{Cli, CliConfig, CliResult};
use streak_storage::{LmdbCacheStore, YearCache};
use streak_sync::{HttpEdgeCache, HttpOrigin, SyncOrchestrator};
use tracing::{debug, error};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_json) {
        eprintln!("{e}");
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "streak failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> CliResult<bool> {
    let config = CliConfig::load(cli.config)?;
    let sync_config = config.sync_config()?;

    let store = LmdbCacheStore::new(&config.cache.path, config.cache.max_size_mb)?;
    let cache = YearCache::with_policy(Arc::new(store), sync_config.freshness);

    let mut origin = HttpOrigin::new(config.origin.base_url.clone());
    if let Some(token) = &config.origin.token {
        origin = origin.with_token(token.clone());
    }
    if let Some(timeout) = config.request_timeout() {
        origin = origin.with_request_timeout(timeout);
    }
    debug!(origin = origin.base_url(), "Origin configured");

    let orchestrator = match &config.edge {
        Some(edge) => {
            let mut tier = HttpEdgeCache::new(edge.url.clone());
            if let Some(ms) = edge.timeout_ms {
                tier = tier.with_timeout(std::time::Duration::from_millis(ms));
            }
            SyncOrchestrator::with_edge(cache, Arc::new(origin), Arc::new(tier), sync_config)
        }
        None => SyncOrchestrator::new(cache, Arc::new(origin), sync_config),
    };

    let outcome = run_command(&orchestrator, &cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    Ok(outcome.ok)
}
