//! Job trait and job failure types.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a failed job attempt.
///
/// The coordinator treats every variant as a failed attempt and retries it
/// while the job still has budget left.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// A data store, RPC or flow programming call failed.
    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    /// Unexpected state inside the job, including a panic during execution.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl JobError {
    /// Creates a remote call error.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        JobError::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        JobError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for job execution.
pub type JobResult<T> = Result<T, JobError>;

/// A unit of work executed by the [`JobCoordinator`](crate::JobCoordinator).
///
/// Jobs are built fresh for every triggering event and are not persisted. A job
/// is run again from the start on retry, so `run` must be idempotent: with
/// unchanged external state a second run issues no further mutation.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Returns a short name for logging (e.g. `mcast-update net1@gw1`).
    fn name(&self) -> String;

    /// Performs the job, awaiting every mutation it issues.
    async fn run(&self) -> JobResult<()>;

    /// Called once after the last attempt failed.
    async fn rollback(&self) -> JobResult<()> {
        Ok(())
    }
}

/// Adapter turning an async closure into a [`Job`].
pub struct FnJob<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn run(&self) -> JobResult<()> {
        (self.f)().await
    }
}

/// Wraps an async closure as a shareable job.
pub fn job_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Job>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    Arc::new(FnJob {
        name: name.into(),
        f,
    })
}
