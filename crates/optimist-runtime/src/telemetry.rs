//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use optimist_core::{OptimistError, OptimistResult};

use crate::TelemetryConfig;

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `config.default_directive`. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> OptimistResult<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| OptimistError::Telemetry(e.to_string()))
}

fn build_filter(config: &TelemetryConfig) -> OptimistResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.default_directive)
            .map_err(|e| OptimistError::Telemetry(e.to_string())),
    }
}
