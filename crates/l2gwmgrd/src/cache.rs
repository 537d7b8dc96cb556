//! Topology caches shared by event handlers and jobs.
//!
//! These are plain objects built once by [`L2GwManager`](crate::L2GwManager)
//! and handed to every job through [`TopologyState`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sonic_l2gw_types::{DeviceId, DpnId};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use crate::ha::HaTopologyIndex;

/// An ELAN and its tunnel identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElanInstance {
    pub name: String,
    /// VXLAN network identifier used on tunnels and logical switches.
    pub vni: u32,
    /// Local tag carried in flow metadata.
    pub elan_tag: u32,
}

/// Known ELAN instances by name.
#[derive(Debug, Default)]
pub struct ElanInstanceCache {
    elans: DashMap<String, ElanInstance>,
}

impl ElanInstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, elan: ElanInstance) {
        self.elans.insert(elan.name.clone(), elan);
    }

    pub fn remove(&self, name: &str) -> Option<ElanInstance> {
        self.elans.remove(name).map(|(_, elan)| elan)
    }

    pub fn get(&self, name: &str) -> Option<ElanInstance> {
        self.elans.get(name).map(|elan| elan.value().clone())
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.elans.iter().map(|elan| elan.key().clone()).collect()
    }
}

/// DPNs carrying each ELAN, with their member interfaces.
#[derive(Debug, Default)]
pub struct ElanDpnCache {
    elans: DashMap<String, BTreeMap<DpnId, BTreeSet<String>>>,
}

impl ElanDpnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface; returns true if `dpn` just joined `elan`.
    pub fn add_interface(&self, elan: &str, dpn: DpnId, interface: &str) -> bool {
        let mut dpns = self.elans.entry(elan.to_string()).or_default();
        let joined = !dpns.contains_key(&dpn);
        dpns.entry(dpn).or_default().insert(interface.to_string());
        joined
    }

    /// Removes an interface; returns true if `dpn` no longer carries `elan`.
    pub fn remove_interface(&self, elan: &str, dpn: DpnId, interface: &str) -> bool {
        let Some(mut dpns) = self.elans.get_mut(elan) else {
            return false;
        };
        let Some(interfaces) = dpns.get_mut(&dpn) else {
            return false;
        };
        interfaces.remove(interface);
        if interfaces.is_empty() {
            dpns.remove(&dpn);
            return true;
        }
        false
    }

    pub fn dpns(&self, elan: &str) -> Vec<DpnId> {
        self.elans
            .get(elan)
            .map(|dpns| dpns.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Port and VLAN of a gateway attached to an ELAN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortBinding {
    /// Physical switch name under the gateway's global node.
    pub switch: String,
    pub port: String,
    pub vlan: u16,
}

/// A connected gateway device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2GatewayDevice {
    /// Global node id.
    pub device: DeviceId,
    pub name: String,
    /// Tunnel endpoint, once the device reported one.
    pub tunnel_ip: Option<IpAddr>,
}

/// Connected gateways and their ELAN connections.
#[derive(Debug, Default)]
pub struct L2GatewayCache {
    devices: DashMap<DeviceId, L2GatewayDevice>,
    connections: DashMap<String, BTreeMap<DeviceId, BTreeSet<PortBinding>>>,
}

impl L2GatewayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: L2GatewayDevice) {
        self.devices.insert(device.device.clone(), device);
    }

    pub fn remove_device(&self, device: &DeviceId) -> Option<L2GatewayDevice> {
        self.devices.remove(device).map(|(_, device)| device)
    }

    pub fn device(&self, device: &DeviceId) -> Option<L2GatewayDevice> {
        self.devices.get(device).map(|entry| entry.value().clone())
    }

    pub fn devices(&self) -> Vec<L2GatewayDevice> {
        let mut devices: Vec<L2GatewayDevice> =
            self.devices.iter().map(|entry| entry.value().clone()).collect();
        devices.sort_by(|a, b| a.device.cmp(&b.device));
        devices
    }

    /// Records a connection; returns true if it is the device's first on `elan`.
    pub fn connect(&self, elan: &str, device: &DeviceId, bindings: &[PortBinding]) -> bool {
        let mut devices = self.connections.entry(elan.to_string()).or_default();
        let first = !devices.contains_key(device);
        devices
            .entry(device.clone())
            .or_default()
            .extend(bindings.iter().cloned());
        first
    }

    /// Removes `bindings`; returns true if the device has no binding left on `elan`.
    pub fn disconnect(&self, elan: &str, device: &DeviceId, bindings: &[PortBinding]) -> bool {
        let Some(mut devices) = self.connections.get_mut(elan) else {
            return true;
        };
        let Some(remaining) = devices.get_mut(device) else {
            return true;
        };
        for binding in bindings {
            remaining.remove(binding);
        }
        if remaining.is_empty() {
            devices.remove(device);
            return true;
        }
        false
    }

    /// Whether `device` has any binding on `elan`.
    pub fn is_connected(&self, elan: &str, device: &DeviceId) -> bool {
        self.connections
            .get(elan)
            .map_or(false, |devices| devices.contains_key(device))
    }

    pub fn bindings(&self, elan: &str, device: &DeviceId) -> BTreeSet<PortBinding> {
        self.connections
            .get(elan)
            .and_then(|devices| devices.get(device).cloned())
            .unwrap_or_default()
    }

    /// Connected devices attached to `elan`.
    pub fn devices_for_elan(&self, elan: &str) -> Vec<L2GatewayDevice> {
        let attached: Vec<DeviceId> = self
            .connections
            .get(elan)
            .map(|devices| devices.keys().cloned().collect())
            .unwrap_or_default();
        attached
            .iter()
            .filter_map(|device| self.device(device))
            .collect()
    }

    /// ELANs `device` is attached to.
    pub fn elans_for_device(&self, device: &DeviceId) -> BTreeSet<String> {
        self.connections
            .iter()
            .filter(|entry| entry.value().contains_key(device))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Every cache, bundled for injection into jobs.
#[derive(Debug, Default)]
pub struct TopologyState {
    pub elans: ElanInstanceCache,
    pub dpns: ElanDpnCache,
    pub gateways: L2GatewayCache,
    pub ha: Arc<HaTopologyIndex>,
}

impl TopologyState {
    pub fn new() -> Self {
        Self::default()
    }
}
