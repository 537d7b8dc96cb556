//! State-mutation jobs.
//!
//! Each job reads the current caches and device state for its key, computes
//! the mutations still needed and issues them as one batch. Running a job
//! again with unchanged state issues nothing.
//!
//! Key conventions:
//!
//! | Job | Key |
//! |-----|-----|
//! | [`BroadcastGroupJob`] | `<elan>` |
//! | [`McastMacUpdateJob`], [`AssociateJob`], [`DisassociateJob`], [`LogicalSwitchDeleteJob`] | `<device>:<elan>` |
//! | [`DmacJob`] | `<elan>:<dpn>` |
//! | [`HaConfigSyncJob`] | `<parent device>` |

mod associate;
mod broadcast;
mod dmac;
mod ha_sync;
mod ls_delete;
mod mcast;

pub use associate::{AssociateJob, DisassociateJob};
pub use broadcast::BroadcastGroupJob;
pub use dmac::{DmacAction, DmacJob};
pub use ha_sync::HaConfigSyncJob;
pub use ls_delete::{LogicalSwitchDeleteJob, LogicalSwitchDeletions};
pub use mcast::McastMacUpdateJob;

use sonic_l2gw_common::{DelayScheduler, Job, JobCoordinator};
use sonic_l2gw_types::{DeviceId, DpnId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{ElanInstance, TopologyState};
use crate::flow::{FlowProgrammer, TunnelResolver};
use crate::store::DataStore;

/// Key of jobs scoped to one ELAN.
pub fn elan_key(elan: &str) -> String {
    elan.to_string()
}

/// Key of jobs scoped to one gateway device on one ELAN.
pub fn device_elan_key(device: &DeviceId, elan: &str) -> String {
    format!("{}:{}", device.global_node(), elan)
}

/// Key of jobs scoped to one DPN on one ELAN.
pub fn elan_dpn_key(elan: &str, dpn: DpnId) -> String {
    format!("{}:{}", elan, dpn)
}

/// Job submission settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// Attempts per job.
    pub max_retries: u32,
    /// Submit through the leadership check.
    pub owner_only: bool,
    /// Delay before an unused logical switch is deleted.
    pub ls_delete_delay: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            owner_only: true,
            ls_delete_delay: Duration::from_secs(20),
        }
    }
}

/// Everything a job needs, shared by every job instance.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn DataStore>,
    pub flows: Arc<dyn FlowProgrammer>,
    pub tunnels: Arc<dyn TunnelResolver>,
    pub topology: Arc<TopologyState>,
    pub coordinator: JobCoordinator,
    pub scheduler: Arc<dyn DelayScheduler>,
    pub deletions: Arc<LogicalSwitchDeletions>,
    pub settings: JobSettings,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("coordinator", &self.coordinator)
            .field("settings", &self.settings)
            .finish()
    }
}

impl JobContext {
    /// Submits `job` under `key` with the configured retries, through the
    /// leadership check when enabled. Returns false if the job was skipped.
    pub fn submit(&self, key: String, job: Arc<dyn Job>) -> bool {
        debug!(key = %key, job = %job.name(), "submitting job");
        if self.settings.owner_only {
            self.coordinator
                .enqueue_on_owner(key, job, self.settings.max_retries)
        } else {
            self.coordinator
                .enqueue_with_retries(key, job, self.settings.max_retries);
            true
        }
    }

    pub fn elan(&self, name: &str) -> Option<ElanInstance> {
        self.topology.elans.get(name)
    }

    pub(crate) fn submit_broadcast(&self, elan: &str) {
        let job = BroadcastGroupJob::new(self.clone(), elan);
        self.submit(elan_key(elan), Arc::new(job));
    }

    pub(crate) fn submit_mcast(&self, job: McastMacUpdateJob) {
        self.submit(job.key(), Arc::new(job));
    }

    pub(crate) fn submit_dmac(&self, job: DmacJob) {
        self.submit(job.key(), Arc::new(job));
    }
}
