//! Store and telemetry configuration

use serde::{Deserialize, Serialize};

use optimist_core::{OptimistError, OptimistResult};

/// What happens to a transaction's guess when its workflow fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Settle with the identity transform, discarding the guess
    #[default]
    Revert,
    /// Leave the guess in place as if it were the final outcome
    KeepOptimistic,
}

/// Store configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name attached to log spans
    pub name: String,
    /// Failure handling for unsettled transactions
    pub failure_policy: FailurePolicy,
    /// Emit a trace event per commit
    pub log_commits: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            name: "store".to_string(),
            failure_policy: FailurePolicy::Revert,
            log_commits: true,
        }
    }
}

impl StoreConfig {
    /// Keep the optimistic guess when a transaction fails
    pub fn compat() -> Self {
        StoreConfig {
            failure_policy: FailurePolicy::KeepOptimistic,
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        StoreConfig {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> OptimistResult<Self> {
        let config: StoreConfig =
            serde_json::from_str(json).map_err(|e| OptimistError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OptimistResult<()> {
        if self.name.trim().is_empty() {
            return Err(OptimistError::InvalidConfig(
                "store name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tracing subscriber configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub default_directive: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            default_directive: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    pub fn verbose() -> Self {
        TelemetryConfig {
            default_directive: "optimist_runtime=trace,optimist_state=trace,info".to_string(),
            json: false,
        }
    }
}
