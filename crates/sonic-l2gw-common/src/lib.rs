//! Job coordination primitives for L2 gateway state management.
//!
//! Every mutation of ELAN, gateway or DPN state is expressed as a [`Job`] and
//! submitted to the [`JobCoordinator`] under a resource key:
//!
//! - [`JobCoordinator`]: one FIFO worker per key, unrelated keys run in parallel
//! - [`RetryPolicy`]: backoff that grows as the remaining retry budget shrinks
//! - [`LeadershipCheck`]: restricts owner-only jobs to the cluster owner of a key
//! - [`DelayScheduler`]: cancellable delayed work (e.g. logical switch deletion)
//!
//! # Example
//!
//! ```ignore
//! use sonic_l2gw_common::{job_fn, JobCoordinator, JobCoordinatorConfig};
//!
//! let coordinator = JobCoordinator::new(JobCoordinatorConfig::default());
//! coordinator.enqueue("net1", job_fn("noop", || async { Ok(()) }));
//! coordinator.wait_idle().await;
//! ```

mod coordinator;
mod job;
mod leadership;
mod retry;
mod scheduler;

pub use coordinator::{
    JobCallbacks, JobCoordinator, JobCoordinatorBuilder, JobCoordinatorConfig, JobCoordinatorStats,
};
pub use job::{job_fn, FnJob, Job, JobError, JobResult};
pub use leadership::{AlwaysOwner, LeadershipCheck};
pub use retry::RetryPolicy;
pub use scheduler::{DelayScheduler, ScheduledHandle, TokioScheduler};
