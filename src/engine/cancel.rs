//! Cooperative cancellation for in-flight flows.
//!
//! A [`CancelHandle`] owns the signal; any number of [`CancelToken`] clones
//! observe it. Poll sleeps and retry backoff race against
//! [`CancelToken::cancelled`] so a cancelled flow aborts promptly.

use std::future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected cancellation handle and token.
#[must_use]
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Signal cancellation to every token derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Derive another token observing this handle.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    ///
    /// Dropping the sender means [`Self::cancelled`] parks forever.
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            future::pending::<()>().await;
        }
    }

    /// Derive a token that fires when this one does or when `deadline`
    /// elapses, whichever comes first.
    ///
    /// The returned [`JoinHandle`] drives the deadline; abort it once the
    /// guarded work is finished.
    #[must_use]
    pub fn with_deadline(&self, deadline: Duration) -> (Self, JoinHandle<()>) {
        let (handle, token) = cancellation();
        if self.is_cancelled() {
            handle.cancel();
        }
        let parent = self.clone();
        let driver = tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => {}
                () = tokio::time::sleep(deadline) => {
                    tracing::warn!(deadline = ?deadline, "flow deadline elapsed, cancelling");
                }
            }
            handle.cancel();
        });
        (token, driver)
    }
}
