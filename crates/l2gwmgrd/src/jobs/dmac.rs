//! Device-to-DPN destination MAC flows.

use async_trait::async_trait;
use sonic_l2gw_common::{Job, JobResult};
use sonic_l2gw_types::{DeviceId, DpnId, MacAddress, Plane};
use tracing::{debug, info, instrument};

use super::{elan_dpn_key, JobContext};
use crate::cache::ElanInstance;
use crate::error::Result;
use crate::flow::{Action, FlowDescriptor, TunnelEndpoint};
use crate::ha::{LocalUcastMacCommand, MergeCommand};

/// Whether a [`DmacJob`] adds or removes flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmacAction {
    Install,
    Uninstall,
}

/// Installs (or removes) on `dpn` one DMAC flow per host MAC learned by each
/// of `devices` on `elan`, pointing at the device's tunnel endpoint.
///
/// Flows already matching are left alone on install and flows already absent
/// are skipped on uninstall.
pub struct DmacJob {
    ctx: JobContext,
    elan: String,
    dpn: DpnId,
    devices: Vec<DeviceId>,
    action: DmacAction,
    retired: Option<ElanInstance>,
}

impl DmacJob {
    pub fn new(
        ctx: JobContext,
        elan: impl Into<String>,
        dpn: DpnId,
        devices: Vec<DeviceId>,
        action: DmacAction,
    ) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            dpn,
            devices,
            action,
            retired: None,
        }
    }

    /// Removes the flows of an ELAN that is no longer in the cache.
    pub fn teardown(ctx: JobContext, elan: ElanInstance, dpn: DpnId, devices: Vec<DeviceId>) -> Self {
        let name = elan.name.clone();
        Self {
            retired: Some(elan),
            ..Self::new(ctx, name, dpn, devices, DmacAction::Uninstall)
        }
    }

    pub fn install(ctx: JobContext, elan: impl Into<String>, dpn: DpnId, devices: Vec<DeviceId>) -> Self {
        Self::new(ctx, elan, dpn, devices, DmacAction::Install)
    }

    pub fn uninstall(ctx: JobContext, elan: impl Into<String>, dpn: DpnId, devices: Vec<DeviceId>) -> Self {
        Self::new(ctx, elan, dpn, devices, DmacAction::Uninstall)
    }

    pub fn key(&self) -> String {
        elan_dpn_key(&self.elan, self.dpn)
    }

    /// Host MACs the device learned on this ELAN's logical switch.
    async fn device_macs(&self, device: &DeviceId) -> Result<Vec<MacAddress>> {
        let operational = self
            .ctx
            .store
            .read_snapshot(device, Plane::Operational)
            .await?;
        Ok(LocalUcastMacCommand
            .extract(&operational)
            .into_iter()
            .filter(|entry| entry.logical_switch.name == self.elan)
            .map(|entry| entry.mac)
            .collect())
    }

    async fn egress(&self, device: &DeviceId, vni: u32) -> Result<Option<Vec<Action>>> {
        let Some(tep) = self
            .ctx
            .topology
            .gateways
            .device(device)
            .and_then(|gateway| gateway.tunnel_ip)
        else {
            return Ok(None);
        };
        let actions = self
            .ctx
            .tunnels
            .egress_actions(self.dpn, TunnelEndpoint::External(tep), u64::from(vni))
            .await?;
        Ok(Some(actions))
    }
}

#[async_trait]
impl Job for DmacJob {
    fn name(&self) -> String {
        let verb = match self.action {
            DmacAction::Install => "install",
            DmacAction::Uninstall => "uninstall",
        };
        format!("dmac-{} {}@{}", verb, self.elan, self.dpn)
    }

    #[instrument(skip(self), fields(elan = %self.elan, dpn = %self.dpn, action = ?self.action))]
    async fn run(&self) -> JobResult<()> {
        let Some(elan) = self.retired.clone().or_else(|| self.ctx.elan(&self.elan)) else {
            debug!("ELAN no longer exists, nothing to program");
            return Ok(());
        };

        let mut flows = 0;
        for device in &self.devices {
            let macs = self.device_macs(device).await?;
            if macs.is_empty() {
                continue;
            }

            match self.action {
                DmacAction::Install => {
                    let Some(actions) = self.egress(device, elan.vni).await? else {
                        debug!(%device, "device has no tunnel endpoint yet, skipped");
                        continue;
                    };
                    for mac in macs {
                        let flow = FlowDescriptor::dmac(self.dpn, elan.elan_tag, mac, actions.clone());
                        let current = self.ctx.flows.installed_flow(self.dpn, &flow.flow_id).await?;
                        if current.as_ref() == Some(&flow) {
                            continue;
                        }
                        self.ctx.flows.install_flow(&flow).await?;
                        flows += 1;
                    }
                }
                DmacAction::Uninstall => {
                    for mac in macs {
                        let flow = FlowDescriptor::dmac(self.dpn, elan.elan_tag, mac, Vec::new());
                        if self.ctx.flows.installed_flow(self.dpn, &flow.flow_id).await?.is_none() {
                            continue;
                        }
                        self.ctx.flows.remove_flow(&flow).await?;
                        flows += 1;
                    }
                }
            }
        }

        if flows > 0 {
            info!(flows, "DMAC flows programmed");
        } else {
            debug!("DMAC flows up to date");
        }
        Ok(())
    }
}
