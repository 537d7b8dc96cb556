//! Delayed deletion of a gateway's logical switch.

use async_trait::async_trait;
use dashmap::DashMap;
use sonic_l2gw_common::{Job, JobResult, ScheduledHandle};
use sonic_l2gw_types::{DeviceId, Plane};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

use super::{device_elan_key, JobContext};
use crate::entities::{EntityKind, HwvtepEntity};
use crate::error::Result;
use crate::ha::{MergeCommand, RemoteMcastMacCommand, RemoteUcastMacCommand};
use crate::store::MutationBatch;

#[derive(Debug)]
struct PendingDeletion {
    generation: u64,
    guard: ScheduledHandle,
    timer: Option<ScheduledHandle>,
}

impl PendingDeletion {
    fn cancel(&self) {
        self.guard.cancel();
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

/// Pending logical switch deletions, keyed like the device/ELAN jobs.
///
/// Each registration gets a generation number so a deletion that fires late
/// can only clear its own entry.
#[derive(Debug, Default)]
pub struct LogicalSwitchDeletions {
    pending: DashMap<String, PendingDeletion>,
    next_generation: AtomicU64,
}

impl LogicalSwitchDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a deletion guarded by `guard`, replacing and cancelling any
    /// earlier one for `key`.
    pub fn register(&self, key: &str, guard: ScheduledHandle) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.pending.insert(
            key.to_string(),
            PendingDeletion {
                generation,
                guard,
                timer: None,
            },
        );
        if let Some(previous) = previous {
            previous.cancel();
        }
        generation
    }

    /// Stores the timer of the registration `generation`. A timer for a
    /// registration that is already gone is cancelled right away.
    pub fn attach_timer(&self, key: &str, generation: u64, timer: ScheduledHandle) {
        match self.pending.get_mut(key) {
            Some(mut entry) if entry.generation == generation => entry.timer = Some(timer),
            _ => timer.cancel(),
        }
    }

    /// Cancels the pending deletion for `key`; returns true if there was one.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                pending.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Clears the entry for `key` if it still belongs to `generation`.
    pub fn complete(&self, key: &str, generation: u64) {
        self.pending
            .remove_if(key, |_, pending| pending.generation == generation);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Deletes the logical switch of `elan` on `device`, together with the remote
/// entries this system wrote on it, unless the device reconnected meanwhile.
pub struct LogicalSwitchDeleteJob {
    ctx: JobContext,
    elan: String,
    device: DeviceId,
    guard: ScheduledHandle,
    generation: u64,
}

impl LogicalSwitchDeleteJob {
    pub fn new(
        ctx: JobContext,
        elan: impl Into<String>,
        device: &DeviceId,
        guard: ScheduledHandle,
        generation: u64,
    ) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            device: device.global_node(),
            guard,
            generation,
        }
    }

    pub fn key(&self) -> String {
        device_elan_key(&self.device, &self.elan)
    }

    async fn plan(&self) -> Result<MutationBatch> {
        let config = self
            .ctx
            .store
            .read_snapshot(&self.device, Plane::Config)
            .await?;

        let mut batch = MutationBatch::new();
        for entry in RemoteUcastMacCommand.extract(&config) {
            if entry.logical_switch.name == self.elan {
                batch.delete(&self.device, Plane::Config, EntityKind::RemoteUcastMac, entry.key());
            }
        }
        for entry in RemoteMcastMacCommand.extract(&config) {
            if entry.logical_switch.name == self.elan {
                batch.delete(&self.device, Plane::Config, EntityKind::RemoteMcastMac, entry.key());
            }
        }
        batch.delete(&self.device, Plane::Config, EntityKind::LogicalSwitch, self.elan.clone());
        Ok(batch)
    }
}

#[async_trait]
impl Job for LogicalSwitchDeleteJob {
    fn name(&self) -> String {
        format!("ls-delete {}@{}", self.elan, self.device)
    }

    #[instrument(skip(self), fields(elan = %self.elan, device = %self.device))]
    async fn run(&self) -> JobResult<()> {
        let key = self.key();
        if self.guard.is_cancelled() {
            debug!("deletion cancelled, logical switch kept");
            return Ok(());
        }
        if self.ctx.topology.gateways.is_connected(&self.elan, &self.device) {
            debug!("device reconnected, logical switch kept");
            self.ctx.deletions.complete(&key, self.generation);
            return Ok(());
        }

        let batch = self.plan().await?;
        if self.guard.is_cancelled() {
            debug!("deletion cancelled, logical switch kept");
            return Ok(());
        }
        info!(mutations = batch.len(), "deleting logical switch");
        self.ctx.store.write_batch(batch).await?;
        self.ctx.deletions.complete(&key, self.generation);
        Ok(())
    }
}
