//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays clean JSON.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CliError, CliResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "streak=info,streak_cli=info,streak_sync=info,streak_storage=warn";

pub fn init_tracing(json: bool) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Telemetry(e.to_string()))
}
