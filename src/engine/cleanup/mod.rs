//! Deterministic teardown of resources created by a flow.
//!
//! Steps register teardown actions as they succeed. When the flow finishes,
//! successfully or not, [`CleanupGuard::run_all`] invokes every registered
//! action exactly once in reverse registration order. Failures are collected
//! rather than propagated: a failing teardown never stops later ones and never
//! changes the flow's verdict.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn};

use super::operation::Operation;
use crate::error::FlowError;

/// Tuning for a [`CleanupGuard`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Drain registered actions without running them.
    pub skip: bool,
    /// Upper bound on a single action's runtime.
    pub action_timeout: Option<Duration>,
}

/// One registered teardown action.
pub struct CleanupAction {
    order: usize,
    name: String,
    action: Box<dyn Operation>,
    best_effort: bool,
}

impl CleanupAction {
    /// Create a best-effort action.
    #[must_use]
    pub fn new(name: impl Into<String>, action: impl Operation + 'static) -> Self {
        Self {
            order: 0,
            name: name.into(),
            action: Box::new(action),
            best_effort: true,
        }
    }

    /// Mark whether a failure of this action is tolerable.
    ///
    /// Failures of required actions are logged at error level and flagged
    /// in the resulting [`CleanupFailure`].
    #[must_use]
    pub const fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// Registration index within its guard.
    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Name used in logs and failure reports.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("order", &self.order)
            .field("name", &self.name)
            .field("best_effort", &self.best_effort)
            .finish_non_exhaustive()
    }
}

/// A teardown action that failed.
#[derive(Debug)]
pub struct CleanupFailure {
    /// Registration index of the failed action.
    pub order: usize,
    /// Name of the failed action.
    pub name: String,
    /// What went wrong.
    pub error: FlowError,
    /// Whether the action was registered as best effort.
    pub best_effort: bool,
}

/// Ordered collection of pending teardown actions.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    actions: Vec<CleanupAction>,
    registered: usize,
    settings: CleanupSettings,
}

impl CleanupGuard {
    /// Create an empty guard with the given settings.
    #[must_use]
    pub const fn new(settings: CleanupSettings) -> Self {
        Self {
            actions: Vec::new(),
            registered: 0,
            settings,
        }
    }

    /// Register a best-effort teardown action.
    pub fn register(&mut self, name: impl Into<String>, action: impl Operation + 'static) {
        self.register_action(CleanupAction::new(name, action));
    }

    /// Register a prepared teardown action.
    pub fn register_action(&mut self, mut action: CleanupAction) {
        action.order = self.registered;
        self.registered = self.registered.saturating_add(1);
        info!(order = action.order, cleanup = %action.name, "registered cleanup");
        self.actions.push(action);
    }

    /// Number of actions still pending.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Run every pending action in reverse registration order.
    ///
    /// The pending list is drained first, so a second call runs nothing and
    /// returns no failures.
    pub async fn run_all(&mut self) -> Vec<CleanupFailure> {
        let actions = std::mem::take(&mut self.actions);
        let mut failures = Vec::new();

        for action in actions.into_iter().rev() {
            if self.settings.skip {
                info!(order = action.order, cleanup = %action.name, "cleanup skipped");
                continue;
            }
            info!(order = action.order, cleanup = %action.name, "running cleanup");
            if let Err(failure) = self.run_one(&action).await {
                if action.best_effort {
                    warn!(order = action.order, cleanup = %action.name, error = %failure, "cleanup failed");
                } else {
                    error!(order = action.order, cleanup = %action.name, error = %failure, "required cleanup failed");
                }
                failures.push(CleanupFailure {
                    order: action.order,
                    name: action.name,
                    error: failure,
                    best_effort: action.best_effort,
                });
            }
        }
        failures
    }

    async fn run_one(&self, action: &CleanupAction) -> Result<(), FlowError> {
        let Some(limit) = self.settings.action_timeout else {
            return action.action.run().await.map_err(FlowError::from);
        };
        tokio::time::timeout(limit, action.action.run())
            .await
            .map_err(|_| FlowError::timeout(format!("cleanup '{}'", action.name), limit))?
            .map_err(FlowError::from)
    }
}
