//! Command execution against a built orchestrator.

use serde::Serialize;
use serde_json::{json, Value};
use streak_core::{SyncResult, Year};
use streak_storage::CacheStore;
use streak_sync::SyncOrchestrator;
use tracing::{info, warn};

use crate::cli::Command;
use crate::error::CliResult;

/// What a command produced: the JSON report and whether every year succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub report: Value,
    pub ok: bool,
}

#[derive(Serialize)]
struct YearReport<'a> {
    year: Year,
    #[serde(flatten)]
    result: &'a SyncResult,
}

pub async fn run_command<S: CacheStore + 'static>(
    orchestrator: &SyncOrchestrator<S>,
    command: &Command,
) -> CliResult<Outcome> {
    match command {
        Command::Sync { years, .. } => {
            let results = orchestrator
                .sync_multiple_years(years, command.sync_options())
                .await;
            let failed: Vec<Year> = results
                .iter()
                .filter(|(_, result)| !result.success)
                .map(|(year, _)| *year)
                .collect();
            if failed.is_empty() {
                info!(years = results.len(), "Sync finished");
            } else {
                warn!(?failed, "Sync finished with failures");
            }

            let reports: Vec<YearReport<'_>> = results
                .iter()
                .map(|(year, result)| YearReport { year: *year, result })
                .collect();
            Ok(Outcome {
                report: serde_json::to_value(&reports)?,
                ok: failed.is_empty(),
            })
        }
        Command::Status => {
            let status = orchestrator.cache_status().await?;
            Ok(Outcome {
                report: serde_json::to_value(&status)?,
                ok: true,
            })
        }
        Command::Invalidate { years } => {
            let scope = (!years.is_empty()).then_some(years.as_slice());
            let removed = orchestrator.invalidate(scope).await?;
            info!(removed, "Invalidated cache entries");
            Ok(Outcome {
                report: json!({ "removed": removed }),
                ok: true,
            })
        }
    }
}
