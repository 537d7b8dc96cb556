//! Flow/group programming and tunnel resolution boundaries.
//!
//! Jobs describe forwarding state as [`FlowDescriptor`]s and
//! [`GroupDescriptor`]s and hand them to a [`FlowProgrammer`]. Egress actions
//! towards another DPN or an external tunnel endpoint come from a
//! [`TunnelResolver`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sonic_l2gw_types::{DpnId, MacAddress};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{L2gwError, Result};

/// Table holding the destination MAC flows of every ELAN.
pub const ELAN_DMAC_TABLE: u8 = 51;

/// Priority of DMAC flows towards external devices.
pub const ELAN_DMAC_PRIORITY: u16 = 20;

/// Base of the per-ELAN remote broadcast group ids.
pub const ELAN_REMOTE_BC_GROUP_BASE: u32 = 0x0100_0000;

/// Returns the remote broadcast group id of the ELAN with `elan_tag`.
pub fn remote_bc_group_id(elan_tag: u32) -> u32 {
    ELAN_REMOTE_BC_GROUP_BASE + elan_tag
}

/// Match field of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowMatch {
    /// ELAN tag carried in metadata.
    ElanTag(u32),
    EthDst(MacAddress),
}

/// Action of a flow or group bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    SetTunnelId(u64),
    SetTunnelDst(IpAddr),
    Output(String),
    Group(u32),
}

/// A flow entry on one DPN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDescriptor {
    pub dpn: DpnId,
    pub table: u8,
    pub flow_id: String,
    pub priority: u16,
    pub matches: Vec<FlowMatch>,
    pub actions: Vec<Action>,
}

impl FlowDescriptor {
    /// DMAC flow steering `mac` on the ELAN with `elan_tag` to `actions`.
    pub fn dmac(dpn: DpnId, elan_tag: u32, mac: MacAddress, actions: Vec<Action>) -> Self {
        Self {
            dpn,
            table: ELAN_DMAC_TABLE,
            flow_id: format!("{}.{}.{}.{}", ELAN_DMAC_TABLE, dpn, elan_tag, mac),
            priority: ELAN_DMAC_PRIORITY,
            matches: vec![FlowMatch::ElanTag(elan_tag), FlowMatch::EthDst(mac)],
            actions,
        }
    }
}

/// One bucket of an all-type group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub actions: Vec<Action>,
}

/// A group entry on one DPN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub dpn: DpnId,
    pub group_id: u32,
    pub buckets: Vec<Bucket>,
}

/// Installs and removes flows and groups.
///
/// Installing a flow or group replaces any entry with the same id.
#[async_trait]
pub trait FlowProgrammer: Send + Sync {
    async fn install_flow(&self, flow: &FlowDescriptor) -> Result<()>;

    async fn remove_flow(&self, flow: &FlowDescriptor) -> Result<()>;

    /// Returns the flow currently installed under `flow_id`, if any.
    async fn installed_flow(&self, dpn: DpnId, flow_id: &str) -> Result<Option<FlowDescriptor>>;

    async fn install_group(&self, group: &GroupDescriptor) -> Result<()>;

    async fn remove_group(&self, dpn: DpnId, group_id: u32) -> Result<()>;

    /// Returns the group currently installed, if any.
    async fn installed_group(&self, dpn: DpnId, group_id: u32) -> Result<Option<GroupDescriptor>>;
}

/// Tunnel destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelEndpoint {
    /// Another DPN of the fabric.
    Dpn(DpnId),
    /// An external device (hardware VTEP) by tunnel address.
    External(IpAddr),
}

/// Resolves tunnel endpoints and egress actions.
#[async_trait]
pub trait TunnelResolver: Send + Sync {
    /// Returns the tunnel endpoint address of `dpn`, if it has one.
    async fn dpn_tep(&self, dpn: DpnId) -> Result<Option<IpAddr>>;

    /// Returns the actions sending traffic with `tunnel_key` from `src` to `dst`.
    async fn egress_actions(
        &self,
        src: DpnId,
        dst: TunnelEndpoint,
        tunnel_key: u64,
    ) -> Result<Vec<Action>>;
}

/// In-memory flow table.
#[derive(Debug, Default)]
pub struct MemoryFlowProgrammer {
    flows: DashMap<(DpnId, String), FlowDescriptor>,
    groups: DashMap<(DpnId, u32), GroupDescriptor>,
    operations: AtomicU64,
}

impl MemoryFlowProgrammer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the flow with `flow_id` on `dpn`.
    pub fn flow(&self, dpn: DpnId, flow_id: &str) -> Option<FlowDescriptor> {
        self.flows
            .get(&(dpn, flow_id.to_string()))
            .map(|flow| flow.value().clone())
    }

    /// Returns every flow on `dpn`, ordered by id.
    pub fn flows_on(&self, dpn: DpnId) -> Vec<FlowDescriptor> {
        let mut flows: Vec<FlowDescriptor> = self
            .flows
            .iter()
            .filter(|entry| entry.key().0 == dpn)
            .map(|entry| entry.value().clone())
            .collect();
        flows.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        flows
    }

    pub fn group(&self, dpn: DpnId, group_id: u32) -> Option<GroupDescriptor> {
        self.groups
            .get(&(dpn, group_id))
            .map(|group| group.value().clone())
    }

    /// Number of install/remove calls received.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowProgrammer for MemoryFlowProgrammer {
    async fn install_flow(&self, flow: &FlowDescriptor) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.flows
            .insert((flow.dpn, flow.flow_id.clone()), flow.clone());
        Ok(())
    }

    async fn remove_flow(&self, flow: &FlowDescriptor) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.flows.remove(&(flow.dpn, flow.flow_id.clone()));
        Ok(())
    }

    async fn installed_flow(&self, dpn: DpnId, flow_id: &str) -> Result<Option<FlowDescriptor>> {
        Ok(self.flow(dpn, flow_id))
    }

    async fn install_group(&self, group: &GroupDescriptor) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.groups
            .insert((group.dpn, group.group_id), group.clone());
        Ok(())
    }

    async fn remove_group(&self, dpn: DpnId, group_id: u32) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.groups.remove(&(dpn, group_id));
        Ok(())
    }

    async fn installed_group(&self, dpn: DpnId, group_id: u32) -> Result<Option<GroupDescriptor>> {
        Ok(self.group(dpn, group_id))
    }
}

/// Tunnel resolver backed by a static DPN to endpoint table.
///
/// Egress towards any endpoint is `set_tunnel_id`, `set_tunnel_dst` and an
/// output on the source DPN's VXLAN port.
#[derive(Debug, Default)]
pub struct StaticTunnelResolver {
    teps: DashMap<DpnId, IpAddr>,
}

impl StaticTunnelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dpn_tep(&self, dpn: DpnId, tep: IpAddr) {
        self.teps.insert(dpn, tep);
    }

    /// Name of the VXLAN port on `dpn`.
    pub fn tunnel_port(dpn: DpnId) -> String {
        format!("tun{}", dpn)
    }
}

#[async_trait]
impl TunnelResolver for StaticTunnelResolver {
    async fn dpn_tep(&self, dpn: DpnId) -> Result<Option<IpAddr>> {
        Ok(self.teps.get(&dpn).map(|tep| *tep.value()))
    }

    async fn egress_actions(
        &self,
        src: DpnId,
        dst: TunnelEndpoint,
        tunnel_key: u64,
    ) -> Result<Vec<Action>> {
        let remote = match dst {
            TunnelEndpoint::External(ip) => ip,
            TunnelEndpoint::Dpn(dpn) => self
                .dpn_tep(dpn)
                .await?
                .ok_or_else(|| L2gwError::rpc("egress_actions", format!("no tunnel endpoint for dpn {}", dpn)))?,
        };
        Ok(vec![
            Action::SetTunnelId(tunnel_key),
            Action::SetTunnelDst(remote),
            Action::Output(Self::tunnel_port(src)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dmac_flow_id_is_stable() {
        let mac: MacAddress = "00:00:00:00:00:0a".parse().unwrap();
        let a = FlowDescriptor::dmac(DpnId::new(1), 7, mac, vec![]);
        let b = FlowDescriptor::dmac(DpnId::new(1), 7, mac, vec![Action::Output("x".into())]);
        assert_eq!(a.flow_id, b.flow_id);
        assert_eq!(a.flow_id, "51.1.7.00:00:00:00:00:0a");
    }

    #[tokio::test]
    async fn test_static_resolver_egress() {
        let resolver = StaticTunnelResolver::new();
        let d2 = DpnId::new(2);
        resolver.set_dpn_tep(d2, "10.0.0.2".parse().unwrap());

        let actions = resolver
            .egress_actions(DpnId::new(1), TunnelEndpoint::Dpn(d2), 5000)
            .await
            .unwrap();
        assert_eq!(
            actions,
            vec![
                Action::SetTunnelId(5000),
                Action::SetTunnelDst("10.0.0.2".parse().unwrap()),
                Action::Output("tun1".to_string()),
            ]
        );

        let missing = resolver
            .egress_actions(DpnId::new(1), TunnelEndpoint::Dpn(DpnId::new(9)), 5000)
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_memory_programmer_replaces_by_id() {
        let programmer = MemoryFlowProgrammer::new();
        let group = GroupDescriptor {
            dpn: DpnId::new(1),
            group_id: remote_bc_group_id(3),
            buckets: vec![],
        };
        programmer.install_group(&group).await.unwrap();
        programmer.install_group(&group).await.unwrap();
        assert_eq!(
            programmer.installed_group(DpnId::new(1), remote_bc_group_id(3)).await.unwrap(),
            Some(group)
        );
        assert_eq!(programmer.operations(), 2);

        programmer.remove_group(DpnId::new(1), remote_bc_group_id(3)).await.unwrap();
        assert_eq!(programmer.group(DpnId::new(1), remote_bc_group_id(3)), None);
    }

    #[tokio::test]
    async fn test_installed_flow_reads_back_by_id() {
        let programmer = MemoryFlowProgrammer::new();
        let mac: MacAddress = "00:00:00:00:00:0a".parse().unwrap();
        let flow = FlowDescriptor::dmac(DpnId::new(1), 7, mac, vec![Action::Output("tun1".into())]);
        assert_eq!(programmer.installed_flow(DpnId::new(1), &flow.flow_id).await.unwrap(), None);

        programmer.install_flow(&flow).await.unwrap();
        assert_eq!(
            programmer.installed_flow(DpnId::new(1), &flow.flow_id).await.unwrap(),
            Some(flow.clone())
        );
        assert_eq!(programmer.installed_flow(DpnId::new(2), &flow.flow_id).await.unwrap(), None);
    }
}
