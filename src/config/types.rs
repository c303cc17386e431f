//! Configuration data types for stepflow.

use std::collections::BTreeMap;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::engine::{Backoff, CleanupSettings, PollSpec, RetryPolicy};
use crate::error::{ConfigError, Result};

/// Fallback polling cadence used when no interval entry matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SmartDefault, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between two probes.
    #[default = 10]
    pub interval_secs: u64,

    /// Seconds after which a poll gives up.
    #[default = 600]
    pub timeout_secs: u64,
}

/// One entry of the interval table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct IntervalConfig {
    /// Seconds between two probes.
    pub interval_secs: u64,

    /// Seconds after which a poll gives up.
    pub timeout_secs: u64,
}

/// Named polling intervals, keyed by scenario and then by wait.
///
/// ```toml
/// [intervals.upgrade.wait-available]
/// interval_secs = 10
/// timeout_secs = 1800
/// ```
pub type IntervalsConfig = BTreeMap<String, BTreeMap<String, IntervalConfig>>;

/// Bounded retry of flaky operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SmartDefault, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of invocations, including the first.
    #[default = 2]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds; zero retries immediately.
    pub backoff_ms: u64,
}

/// Teardown behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Leave every created resource in place.
    pub skip: bool,

    /// Upper bound on a single teardown action, in seconds.
    pub action_timeout_secs: Option<u64>,
}

/// Whole-flow limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Cancel the flow once this many seconds have passed.
    pub deadline_secs: Option<u64>,
}

/// Root application configuration.
///
/// This structure is loaded from configuration files and environment
/// variables with layered precedence. The precedence order (lowest to
/// highest) is: defaults, configuration file, environment variables.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `STEPFLOW_CONFIG_PATH` environment variable
/// 2. `.stepflow.toml` in the current working directory
/// 3. `.stepflow.toml` in the home directory
/// 4. `~/.config/stepflow/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "STEPFLOW",
    post_merge_hook,
    discovery(
        app_name = "stepflow",
        env_var = "STEPFLOW_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".stepflow.toml",
    )
)]
pub struct AppConfig {
    /// Fallback polling cadence.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub poll: PollConfig,

    /// Named polling intervals.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub intervals: IntervalsConfig,

    /// Retry configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub retry: RetryConfig,

    /// Cleanup configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub cleanup: CleanupConfig,

    /// Flow limits.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub flow: FlowConfig,
}

impl AppConfig {
    /// Resolve the polling specification for a named wait.
    ///
    /// Looks up `intervals.<scenario>.<key>`, then `intervals.default.<key>`,
    /// then falls back to the `[poll]` section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the resolved entry has a zero
    /// interval or a timeout shorter than its interval.
    pub fn intervals(&self, scenario: &str, key: &str) -> Result<PollSpec> {
        let entry = [scenario, "default"]
            .iter()
            .find_map(|table| self.intervals.get(*table)?.get(key))
            .copied();
        let (field, interval_secs, timeout_secs) = entry.map_or_else(
            || {
                (
                    String::from("poll"),
                    self.poll.interval_secs,
                    self.poll.timeout_secs,
                )
            },
            |found| {
                (
                    format!("intervals.{scenario}.{key}"),
                    found.interval_secs,
                    found.timeout_secs,
                )
            },
        );
        PollSpec::from_secs(interval_secs, timeout_secs)
            .map_err(|error| qualify(&field, error).into())
    }

    /// The retry policy for flaky operations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `retry.max_attempts` is zero.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let policy =
            RetryPolicy::new(self.retry.max_attempts).map_err(|error| qualify("retry", error))?;
        if self.retry.backoff_ms == 0 {
            return Ok(policy);
        }
        Ok(policy.with_backoff(Backoff::Fixed(Duration::from_millis(
            self.retry.backoff_ms,
        ))))
    }

    /// Settings for the cleanup guard.
    #[must_use]
    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            skip: self.cleanup.skip,
            action_timeout: self.cleanup.action_timeout_secs.map(Duration::from_secs),
        }
    }

    /// The overall flow deadline, if one is configured.
    #[must_use]
    pub fn flow_deadline(&self) -> Option<Duration> {
        self.flow.deadline_secs.map(Duration::from_secs)
    }
}

/// Prefix an engine validation error's field with its configuration section.
fn qualify(section: &str, error: ConfigError) -> ConfigError {
    match error {
        ConfigError::InvalidValue { field, reason } => ConfigError::InvalidValue {
            field: format!("{section}.{field}"),
            reason,
        },
        other => other,
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // Values are validated when resolved into engine types, so a bad
        // entry only fails the flow that uses it.
        Ok(())
    }
}
