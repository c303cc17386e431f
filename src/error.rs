//! Semantic error types for stepflow.
//!
//! This module defines the error hierarchy for the orchestration engine,
//! following the principle of using semantic error enums (via `thiserror`) for
//! conditions the caller might inspect or retry, while leaving opaque reporting
//! (`eyre::Report`) to the application embedding the engine.
//!
//! The taxonomy maps onto the engine's behaviour as follows:
//!
//! - [`OperationError::Transient`] is retryable and is swallowed by the retry
//!   executor and by resource waiters up to their policy limits.
//! - Every other [`OperationError`] is terminal and aborts the flow.
//! - [`WaitError::Timeout`] reports that a deadline elapsed without the
//!   awaited condition ever holding.
//! - [`WaitError::Cancelled`] reports a caller-initiated abort.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path where the configuration file was expected.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors reported by operations, probes, and cluster collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// A failure expected to clear up on its own, such as a dropped connection.
    #[error("transient failure: {message}")]
    Transient {
        /// A description of the failure.
        message: String,
    },

    /// The addressed resource does not exist (yet).
    #[error("resource not found: {resource}")]
    NotFound {
        /// Identity of the missing resource.
        resource: String,
    },

    /// The caller is not allowed to access the resource.
    #[error("access to '{resource}' denied: {message}")]
    Unauthorized {
        /// Identity of the protected resource.
        resource: String,
        /// A description of the refusal.
        message: String,
    },

    /// The resource was returned in a shape the caller cannot interpret.
    #[error("malformed resource '{resource}': {message}")]
    Malformed {
        /// Identity of the resource.
        resource: String,
        /// A description of what was wrong.
        message: String,
    },

    /// Any other failure that must abort the flow.
    #[error("{message}")]
    Terminal {
        /// A description of the failure.
        message: String,
    },
}

impl OperationError {
    /// Build a [`OperationError::Transient`] from a message.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Build a [`OperationError::Terminal`] from a message.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    /// Build a [`OperationError::NotFound`] for the named resource.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Returns whether the failure is expected to clear up on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors raised by the engine's bounded waits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The deadline elapsed without the awaited condition holding.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The caller cancelled the flow while the wait was in progress.
    #[error("cancelled while waiting for {operation}")]
    Cancelled {
        /// What was being waited for.
        operation: String,
    },
}

/// Top-level error type for stepflow.
///
/// Aggregates the domain-specific errors into a single type used throughout
/// the engine. Step failures wrap their cause in [`FlowError::StepFailed`] so
/// the final verdict always names the step that failed.
#[derive(Debug, Error)]
pub enum FlowError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation, probe, or collaborator reported a failure.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// A bounded wait timed out or was cancelled.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// A step read a handed-off value that no earlier step produced.
    #[error("value '{name}' was not produced by an earlier step")]
    MissingHandoff {
        /// Name of the handoff slot.
        name: String,
    },

    /// A forward step failed and aborted the flow.
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        /// Name of the failed step.
        step: String,
        /// The terminal cause.
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Returns the innermost error, looking through step wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns the name of the failed step, if this error came from one.
    #[must_use]
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Returns whether the root cause is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Wait(WaitError::Timeout { .. }))
    }

    /// Returns whether the root cause is a caller-initiated cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Wait(WaitError::Cancelled { .. }))
    }

    pub(crate) fn cancelled(operation: impl Into<String>) -> Self {
        Self::Wait(WaitError::Cancelled {
            operation: operation.into(),
        })
    }

    pub(crate) fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Wait(WaitError::Timeout {
            operation: operation.into(),
            timeout,
        })
    }
}

/// A specialised `Result` type for stepflow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::Report;
    use rstest::{fixture, rstest};

    /// Fixture providing a sample configuration file path.
    #[fixture]
    fn config_path() -> PathBuf {
        PathBuf::from("/etc/stepflow/config.toml")
    }

    #[rstest]
    fn config_error_file_not_found_displays_correctly(config_path: PathBuf) {
        let error = ConfigError::FileNotFound { path: config_path };
        assert_eq!(
            error.to_string(),
            "configuration file not found: /etc/stepflow/config.toml"
        );
    }

    #[rstest]
    #[case(
        "retry.max_attempts",
        "must be at least 1",
        "invalid configuration value for 'retry.max_attempts': must be at least 1"
    )]
    #[case(
        "poll.interval_secs",
        "must be greater than zero",
        "invalid configuration value for 'poll.interval_secs': must be greater than zero"
    )]
    fn config_error_invalid_value_displays_correctly(
        #[case] field: &str,
        #[case] reason: &str,
        #[case] expected: &str,
    ) {
        let error = ConfigError::InvalidValue {
            field: String::from(field),
            reason: String::from(reason),
        };
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    fn config_error_ortho_config_displays_correctly() {
        let ortho_error = ortho_config::OrthoError::Validation {
            key: String::from("retry.max_attempts"),
            message: String::from("must be a positive integer"),
        };
        let error = ConfigError::OrthoConfig(Arc::new(ortho_error));
        assert_eq!(
            error.to_string(),
            "configuration loading failed: Validation failed for 'retry.max_attempts': must be a positive integer"
        );
    }

    #[rstest]
    #[case(OperationError::transient("connection reset"), "transient failure: connection reset")]
    #[case(OperationError::not_found("host/upgrade"), "resource not found: host/upgrade")]
    #[case(OperationError::terminal("webhook rejected patch"), "webhook rejected patch")]
    fn operation_error_displays_correctly(#[case] error: OperationError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case(OperationError::transient("blip"), true)]
    #[case(OperationError::not_found("ns"), false)]
    #[case(OperationError::terminal("boom"), false)]
    fn operation_error_transient_classification(
        #[case] error: OperationError,
        #[case] expected: bool,
    ) {
        assert_eq!(error.is_transient(), expected);
    }

    #[rstest]
    fn wait_error_timeout_displays_duration() {
        let error = WaitError::Timeout {
            operation: String::from("host 'upgrade' to reach provisioned"),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(
            error.to_string(),
            "timed out after 30s waiting for host 'upgrade' to reach provisioned"
        );
    }

    #[rstest]
    fn step_failed_names_step_and_cause() {
        let error = FlowError::StepFailed {
            step: String::from("apply-manifest"),
            source: Box::new(OperationError::terminal("invalid manifest").into()),
        };
        assert_eq!(
            error.to_string(),
            "step 'apply-manifest' failed: invalid manifest"
        );
        assert_eq!(error.failed_step(), Some("apply-manifest"));
    }

    #[rstest]
    fn timeout_and_cancellation_are_distinguishable_through_step_wrapper() {
        let timed_out = FlowError::StepFailed {
            step: String::from("await-rollout"),
            source: Box::new(FlowError::timeout("rollout", Duration::from_secs(5))),
        };
        let cancelled = FlowError::StepFailed {
            step: String::from("await-rollout"),
            source: Box::new(FlowError::cancelled("rollout")),
        };

        assert!(timed_out.is_timeout());
        assert!(!timed_out.is_cancelled());
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_timeout());
    }

    #[rstest]
    fn flow_error_wraps_config_error() {
        let config_error = ConfigError::MissingRequired {
            field: String::from("intervals.upgrade.wait-available"),
        };
        let flow_error: FlowError = config_error.into();
        assert_eq!(
            flow_error.to_string(),
            "missing required configuration: intervals.upgrade.wait-available"
        );
    }

    #[rstest]
    #[case(
        FlowError::from(OperationError::not_found("namespace/upgrade-ironic")),
        "resource not found: namespace/upgrade-ironic"
    )]
    #[case(
        FlowError::MissingHandoff { name: String::from("observed-generation") },
        "value 'observed-generation' was not produced by an earlier step"
    )]
    fn eyre_report_preserves_error_messages(#[case] error: FlowError, #[case] expected: &str) {
        let report = Report::from(error);
        assert_eq!(report.to_string(), expected);
    }
}
