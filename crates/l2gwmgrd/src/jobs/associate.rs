//! Attaching and detaching a gateway device to and from an ELAN.

use async_trait::async_trait;
use futures::FutureExt;
use sonic_l2gw_common::{Job, JobResult, ScheduledHandle};
use sonic_l2gw_types::{DeviceId, Plane};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    device_elan_key, DmacJob, LogicalSwitchDeleteJob, McastMacUpdateJob, JobContext,
};
use crate::cache::{ElanInstance, PortBinding};
use crate::entities::{EntityItem, EntityKind, HwvtepEntity, LogicalSwitch, LogicalSwitchRef, VlanBinding};
use crate::error::Result;
use crate::ha::{LogicalSwitchCommand, MergeCommand, VlanBindingCommand};
use crate::store::MutationBatch;

fn vlan_binding(device: &DeviceId, elan: &str, binding: &PortBinding) -> VlanBinding {
    VlanBinding {
        port: binding.port.clone(),
        vlan: binding.vlan,
        logical_switch: LogicalSwitchRef::new(device, elan),
    }
}

/// Bindings grouped by the physical switch node they live on.
fn bindings_by_switch<'a>(
    device: &DeviceId,
    bindings: impl IntoIterator<Item = &'a PortBinding>,
) -> Vec<(DeviceId, Vec<&'a PortBinding>)> {
    let mut grouped: Vec<(DeviceId, Vec<&'a PortBinding>)> = Vec::new();
    for binding in bindings {
        let switch = device.physical_switch(&binding.switch);
        match grouped.iter_mut().find(|(node, _)| *node == switch) {
            Some((_, list)) => list.push(binding),
            None => grouped.push((switch, vec![binding])),
        }
    }
    grouped
}

/// Creates the logical switch of `elan` on `device` and binds the device's
/// ports to it, then refreshes flood state and DMAC flows for the ELAN.
///
/// Any pending deletion of the logical switch is cancelled first.
pub struct AssociateJob {
    ctx: JobContext,
    elan: String,
    device: DeviceId,
}

impl AssociateJob {
    pub fn new(ctx: JobContext, elan: impl Into<String>, device: &DeviceId) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            device: device.global_node(),
        }
    }

    pub fn key(&self) -> String {
        device_elan_key(&self.device, &self.elan)
    }

    async fn plan(&self, elan: &ElanInstance) -> Result<MutationBatch> {
        let mut batch = MutationBatch::new();

        let config = self
            .ctx
            .store
            .read_snapshot(&self.device, Plane::Config)
            .await?;
        let desired = LogicalSwitch::new(&self.elan, elan.vni);
        let current = LogicalSwitchCommand
            .extract(&config)
            .into_iter()
            .find(|ls| ls.key() == desired.key());
        if !current.map_or(false, |ls| ls.same_as(&desired)) {
            batch.put(&self.device, Plane::Config, EntityItem::LogicalSwitch(desired));
        }

        let bindings = self.ctx.topology.gateways.bindings(&self.elan, &self.device);
        for (switch, wanted) in bindings_by_switch(&self.device, &bindings) {
            let config = self.ctx.store.read_snapshot(&switch, Plane::Config).await?;
            let existing = VlanBindingCommand.extract(&config);
            for binding in wanted {
                let desired = vlan_binding(&self.device, &self.elan, binding);
                if !existing.iter().any(|current| current.same_as(&desired)) {
                    batch.put(&switch, Plane::Config, EntityItem::VlanBinding(desired));
                }
            }
        }
        Ok(batch)
    }

    fn submit_follow_ups(&self) {
        for gateway in self.ctx.topology.gateways.devices_for_elan(&self.elan) {
            self.ctx
                .submit_mcast(McastMacUpdateJob::new(self.ctx.clone(), &self.elan, &gateway.device));
        }
        self.ctx.submit_broadcast(&self.elan);
        for dpn in self.ctx.topology.dpns.dpns(&self.elan) {
            self.ctx.submit_dmac(DmacJob::install(
                self.ctx.clone(),
                &self.elan,
                dpn,
                vec![self.device.clone()],
            ));
        }
    }
}

#[async_trait]
impl Job for AssociateJob {
    fn name(&self) -> String {
        format!("associate {}@{}", self.elan, self.device)
    }

    #[instrument(skip(self), fields(elan = %self.elan, device = %self.device))]
    async fn run(&self) -> JobResult<()> {
        if self.ctx.deletions.cancel(&self.key()) {
            info!("cancelled pending logical switch deletion");
        }
        let Some(elan) = self.ctx.elan(&self.elan) else {
            debug!("ELAN no longer exists, nothing to associate");
            return Ok(());
        };

        let batch = self.plan(&elan).await?;
        if batch.is_empty() {
            debug!("logical switch and bindings already present");
        } else {
            info!(mutations = batch.len(), vni = elan.vni, "associating device");
            self.ctx.store.write_batch(batch).await?;
        }

        self.submit_follow_ups();
        Ok(())
    }
}

/// Removes the given port bindings of `device` from `elan`.
///
/// When the device has no binding left on the ELAN, the logical switch is
/// scheduled for deletion after the configured delay and the remaining
/// gateways and DPNs stop flooding to it.
pub struct DisassociateJob {
    ctx: JobContext,
    elan: String,
    device: DeviceId,
    removed: Vec<PortBinding>,
}

impl DisassociateJob {
    pub fn new(
        ctx: JobContext,
        elan: impl Into<String>,
        device: &DeviceId,
        removed: Vec<PortBinding>,
    ) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            device: device.global_node(),
            removed,
        }
    }

    pub fn key(&self) -> String {
        device_elan_key(&self.device, &self.elan)
    }

    async fn plan(&self) -> Result<MutationBatch> {
        let mut batch = MutationBatch::new();
        for (switch, removed) in bindings_by_switch(&self.device, &self.removed) {
            let config = self.ctx.store.read_snapshot(&switch, Plane::Config).await?;
            let present: BTreeSet<String> = VlanBindingCommand
                .extract(&config)
                .iter()
                .filter(|binding| binding.logical_switch.name == self.elan)
                .map(|binding| binding.key())
                .collect();
            for binding in removed {
                let key = vlan_binding(&self.device, &self.elan, binding).key();
                if present.contains(&key) {
                    batch.delete(&switch, Plane::Config, EntityKind::VlanBinding, key);
                }
            }
        }
        Ok(batch)
    }

    /// Registers the deletion before arming the timer so a cancel can never
    /// miss it.
    fn schedule_logical_switch_deletion(&self) {
        let key = self.key();
        let guard = ScheduledHandle::new();
        let generation = self.ctx.deletions.register(&key, guard.clone());

        let job = LogicalSwitchDeleteJob::new(self.ctx.clone(), &self.elan, &self.device, guard, generation);
        let ctx = self.ctx.clone();
        let task = async move {
            let key = job.key();
            ctx.submit(key, Arc::new(job));
        }
        .boxed();
        let timer = self.ctx.scheduler.after(self.ctx.settings.ls_delete_delay, task);
        self.ctx.deletions.attach_timer(&key, generation, timer);
        info!(
            delay_secs = self.ctx.settings.ls_delete_delay.as_secs(),
            "logical switch deletion scheduled"
        );
    }

    fn submit_follow_ups(&self) {
        let own_tep = self
            .ctx
            .topology
            .gateways
            .device(&self.device)
            .and_then(|gateway| gateway.tunnel_ip);
        for gateway in self.ctx.topology.gateways.devices_for_elan(&self.elan) {
            if gateway.device == self.device {
                continue;
            }
            self.ctx.submit_mcast(
                McastMacUpdateJob::new(self.ctx.clone(), &self.elan, &gateway.device).excluding(own_tep),
            );
        }
        self.ctx.submit_broadcast(&self.elan);
        for dpn in self.ctx.topology.dpns.dpns(&self.elan) {
            self.ctx.submit_dmac(DmacJob::uninstall(
                self.ctx.clone(),
                &self.elan,
                dpn,
                vec![self.device.clone()],
            ));
        }
    }
}

#[async_trait]
impl Job for DisassociateJob {
    fn name(&self) -> String {
        format!("disassociate {}@{}", self.elan, self.device)
    }

    #[instrument(skip(self), fields(elan = %self.elan, device = %self.device))]
    async fn run(&self) -> JobResult<()> {
        let batch = self.plan().await?;
        if !batch.is_empty() {
            info!(mutations = batch.len(), "removing VLAN bindings");
            self.ctx.store.write_batch(batch).await?;
        }

        if self.ctx.topology.gateways.is_connected(&self.elan, &self.device) {
            debug!("device still has bindings on the ELAN");
            return Ok(());
        }

        self.schedule_logical_switch_deletion();
        self.submit_follow_ups();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(switch: &str, port: &str, vlan: u16) -> PortBinding {
        PortBinding {
            switch: switch.to_string(),
            port: port.to_string(),
            vlan,
        }
    }

    #[test]
    fn test_bindings_grouped_per_switch() {
        let device = DeviceId::new("hwvtep://uuid/gw1");
        let bindings = vec![
            binding("tor1", "eth1", 100),
            binding("tor2", "eth1", 100),
            binding("tor1", "eth2", 200),
        ];

        let grouped = bindings_by_switch(&device, &bindings);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, device.physical_switch("tor1"));
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, device.physical_switch("tor2"));
        assert_eq!(grouped[1].1.len(), 1);
    }

    #[test]
    fn test_vlan_binding_points_at_global_logical_switch() {
        let device = DeviceId::new("hwvtep://uuid/gw1");
        let vb = vlan_binding(&device.physical_switch("tor1"), "net1", &binding("tor1", "eth1", 100));
        assert_eq!(vb.logical_switch.node, device);
        assert_eq!(vb.key(), "eth1/100");
    }
}
