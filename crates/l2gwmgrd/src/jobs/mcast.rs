//! Remote multicast (flood) entry of one gateway on one ELAN.

use async_trait::async_trait;
use sonic_l2gw_common::{Job, JobResult};
use sonic_l2gw_types::{DeviceId, Plane};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, info, instrument};

use super::{device_elan_key, JobContext};
use crate::entities::{
    EntityItem, EntityKind, HwvtepEntity, LocatorRef, LogicalSwitchRef, McastMac, PhysicalLocator,
};
use crate::error::Result;
use crate::ha::{MergeCommand, PhysicalLocatorCommand, RemoteMcastMacCommand};
use crate::store::MutationBatch;

/// Rewrites the `unknown-dst` remote multicast entry of `device` for `elan`.
///
/// The locator set is every DPN endpoint carrying the ELAN plus every other
/// attached gateway's endpoint, minus `exclude_tep`. When the set is empty
/// the entry is removed.
pub struct McastMacUpdateJob {
    ctx: JobContext,
    elan: String,
    device: DeviceId,
    exclude_tep: Option<IpAddr>,
    include_dpn_teps: bool,
}

impl McastMacUpdateJob {
    pub fn new(ctx: JobContext, elan: impl Into<String>, device: &DeviceId) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            device: device.global_node(),
            exclude_tep: None,
            include_dpn_teps: true,
        }
    }

    /// Leaves `tep` out of the locator set (an endpoint that was just removed).
    pub fn excluding(mut self, tep: Option<IpAddr>) -> Self {
        self.exclude_tep = tep;
        self
    }

    /// Leaves every DPN endpoint out, while a DPN or connection removal is in flight.
    pub fn without_dpn_teps(mut self) -> Self {
        self.include_dpn_teps = false;
        self
    }

    pub fn key(&self) -> String {
        device_elan_key(&self.device, &self.elan)
    }

    async fn desired_teps(&self) -> Result<BTreeSet<IpAddr>> {
        let mut teps = BTreeSet::new();
        if self.include_dpn_teps {
            for dpn in self.ctx.topology.dpns.dpns(&self.elan) {
                if let Some(tep) = self.ctx.tunnels.dpn_tep(dpn).await? {
                    teps.insert(tep);
                }
            }
        }
        teps.extend(
            self.ctx
                .topology
                .gateways
                .devices_for_elan(&self.elan)
                .into_iter()
                .filter(|gateway| gateway.device != self.device)
                .filter_map(|gateway| gateway.tunnel_ip),
        );
        if let Some(tep) = self.exclude_tep {
            teps.remove(&tep);
        }
        Ok(teps)
    }

    async fn plan(&self) -> Result<MutationBatch> {
        let teps = self.desired_teps().await?;
        let config = self
            .ctx
            .store
            .read_snapshot(&self.device, Plane::Config)
            .await?;

        let logical_switch = LogicalSwitchRef::new(&self.device, &self.elan);
        let desired = McastMac::unknown_dst(
            logical_switch,
            teps.iter()
                .map(|tep| LocatorRef::new(&self.device, *tep))
                .collect(),
        );
        let existing = RemoteMcastMacCommand
            .extract(&config)
            .into_iter()
            .find(|entry| entry.key() == desired.key());

        let mut batch = MutationBatch::new();
        if teps.is_empty() {
            if let Some(existing) = existing {
                batch.delete(
                    &self.device,
                    Plane::Config,
                    EntityKind::RemoteMcastMac,
                    existing.key(),
                );
            }
            return Ok(batch);
        }

        let known: BTreeSet<IpAddr> = PhysicalLocatorCommand
            .extract(&config)
            .iter()
            .map(|locator| locator.tep)
            .collect();
        for tep in teps.difference(&known) {
            batch.put(
                &self.device,
                Plane::Config,
                EntityItem::PhysicalLocator(PhysicalLocator::vxlan(*tep)),
            );
        }
        if !existing.map_or(false, |entry| entry.same_as(&desired)) {
            batch.put(&self.device, Plane::Config, EntityItem::RemoteMcastMac(desired));
        }
        Ok(batch)
    }
}

#[async_trait]
impl Job for McastMacUpdateJob {
    fn name(&self) -> String {
        format!("mcast-update {}@{}", self.elan, self.device)
    }

    #[instrument(skip(self), fields(elan = %self.elan, device = %self.device))]
    async fn run(&self) -> JobResult<()> {
        if self.ctx.elan(&self.elan).is_none() {
            debug!("ELAN no longer exists, nothing to update");
            return Ok(());
        }

        let batch = self.plan().await?;
        if batch.is_empty() {
            debug!("multicast entry up to date");
            return Ok(());
        }
        info!(mutations = batch.len(), "updating remote multicast entry");
        self.ctx.store.write_batch(batch).await?;
        Ok(())
    }
}
