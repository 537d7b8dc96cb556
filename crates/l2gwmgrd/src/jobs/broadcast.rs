//! Remote broadcast group of an ELAN.

use async_trait::async_trait;
use sonic_l2gw_common::{Job, JobResult};
use sonic_l2gw_types::DpnId;
use std::net::IpAddr;
use tracing::{debug, info, instrument};

use super::JobContext;
use crate::cache::ElanInstance;
use crate::error::Result;
use crate::flow::{remote_bc_group_id, Bucket, GroupDescriptor, TunnelEndpoint};

/// Recomputes the flood group of `elan` on every DPN carrying it.
///
/// Each DPN's group has one bucket per other DPN of the ELAN and one per
/// attached gateway with a tunnel endpoint. A group that already matches is
/// left alone.
pub struct BroadcastGroupJob {
    ctx: JobContext,
    elan: String,
    retired: Option<ElanInstance>,
}

impl BroadcastGroupJob {
    pub fn new(ctx: JobContext, elan: impl Into<String>) -> Self {
        Self {
            ctx,
            elan: elan.into(),
            retired: None,
        }
    }

    /// Removes the group of an ELAN that is no longer in the cache from every
    /// DPN still carrying it.
    pub fn teardown(ctx: JobContext, elan: ElanInstance) -> Self {
        Self {
            ctx,
            elan: elan.name.clone(),
            retired: Some(elan),
        }
    }

    async fn remove_groups(&self, elan: &ElanInstance) -> Result<usize> {
        let group_id = remote_bc_group_id(elan.elan_tag);
        let mut removed = 0;
        for dpn in self.ctx.topology.dpns.dpns(&elan.name) {
            if self.ctx.flows.installed_group(dpn, group_id).await?.is_none() {
                continue;
            }
            self.ctx.flows.remove_group(dpn, group_id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn desired_group(
        &self,
        elan: &ElanInstance,
        dpn: DpnId,
        dpns: &[DpnId],
        gateway_teps: &[IpAddr],
    ) -> Result<GroupDescriptor> {
        let tunnel_key = u64::from(elan.vni);
        let mut buckets = Vec::with_capacity(dpns.len() + gateway_teps.len());
        for other in dpns.iter().filter(|other| **other != dpn) {
            let actions = self
                .ctx
                .tunnels
                .egress_actions(dpn, TunnelEndpoint::Dpn(*other), tunnel_key)
                .await?;
            buckets.push(Bucket { actions });
        }
        for tep in gateway_teps {
            let actions = self
                .ctx
                .tunnels
                .egress_actions(dpn, TunnelEndpoint::External(*tep), tunnel_key)
                .await?;
            buckets.push(Bucket { actions });
        }
        Ok(GroupDescriptor {
            dpn,
            group_id: remote_bc_group_id(elan.elan_tag),
            buckets,
        })
    }
}

#[async_trait]
impl Job for BroadcastGroupJob {
    fn name(&self) -> String {
        match self.retired {
            Some(_) => format!("bc-group-remove {}", self.elan),
            None => format!("bc-group {}", self.elan),
        }
    }

    #[instrument(skip(self), fields(elan = %self.elan))]
    async fn run(&self) -> JobResult<()> {
        if let Some(retired) = &self.retired {
            let removed = self.remove_groups(retired).await?;
            if removed > 0 {
                info!(groups = removed, "broadcast groups removed");
            }
            return Ok(());
        }

        let Some(elan) = self.ctx.elan(&self.elan) else {
            debug!("ELAN no longer exists, nothing to update");
            return Ok(());
        };

        let dpns = self.ctx.topology.dpns.dpns(&self.elan);
        let gateway_teps: Vec<IpAddr> = self
            .ctx
            .topology
            .gateways
            .devices_for_elan(&self.elan)
            .into_iter()
            .filter_map(|device| device.tunnel_ip)
            .collect();

        let mut installed = 0;
        for dpn in &dpns {
            let desired = self.desired_group(&elan, *dpn, &dpns, &gateway_teps).await?;
            let current = self
                .ctx
                .flows
                .installed_group(*dpn, desired.group_id)
                .await?;
            if current.as_ref() == Some(&desired) {
                continue;
            }
            self.ctx.flows.install_group(&desired).await?;
            installed += 1;
        }

        if installed > 0 {
            info!(groups = installed, buckets_per_dpn = dpns.len().saturating_sub(1) + gateway_teps.len(), "broadcast groups updated");
        }
        Ok(())
    }
}
