//! Configuration system for stepflow.
//!
//! Configuration holds the tuning of a flow: polling cadences, retry budget,
//! cleanup behaviour and the overall deadline. Loading and precedence merging
//! is handled by the `ortho_config` crate. Precedence: environment variables
//! override configuration files, which override defaults.
//!
//! The configuration file is expected at `~/.config/stepflow/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! [poll]
//! interval_secs = 10
//! timeout_secs = 600
//!
//! [intervals.default.wait-deployment]
//! interval_secs = 10
//! timeout_secs = 1200
//!
//! [intervals.upgrade.wait-available]
//! interval_secs = 10
//! timeout_secs = 1800
//!
//! [retry]
//! max_attempts = 2
//! backoff_ms = 0
//!
//! [cleanup]
//! skip = false
//! action_timeout_secs = 600
//!
//! [flow]
//! deadline_secs = 7200
//! ```

mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use loader::{env_var_names, load_config, load_config_with_env};
pub use types::{
    AppConfig, CleanupConfig, FlowConfig, IntervalConfig, IntervalsConfig, PollConfig,
    RetryConfig,
};
