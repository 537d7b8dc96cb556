//! Cancellable delayed execution.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to work scheduled with a [`DelayScheduler`].
///
/// Cancelling stops the timer if it has not fired yet. Work that already fired
/// must check [`ScheduledHandle::is_cancelled`] (or a clone of the token)
/// immediately before it mutates anything, because a cancel can land between
/// the timer firing and the work running.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
    token: CancellationToken,
}

impl ScheduledHandle {
    /// Creates a handle around a fresh token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Default for ScheduledHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a future after a delay unless cancelled first.
pub trait DelayScheduler: Send + Sync {
    /// Schedules `task` to run after `delay`.
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledHandle;
}

/// [`DelayScheduler`] backed by the tokio timer. Must be used inside a runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl DelayScheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> ScheduledHandle {
        let handle = ScheduledHandle::new();
        let token = handle.token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(?delay, "scheduled task cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        task.await;
                    }
                }
            }
        });
        handle
    }
}
