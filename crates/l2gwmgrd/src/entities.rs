//! HWVTEP entity records and device snapshots.
//!
//! Every record carries references to the node that owns it (a logical switch
//! reference names the global node, a locator reference names the node the
//! tunnel endpoint was created on). These references are device-local: the same
//! entry on an HA parent and on one of its children differs only in them.

use serde::{Deserialize, Serialize};
use sonic_l2gw_types::{DeviceId, HwvtepMac, MacAddress};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Encapsulation type of every locator created by this system.
pub const VXLAN_OVER_IPV4: &str = "vxlan_over_ipv4";

/// Common behavior of HWVTEP records.
pub trait HwvtepEntity: Clone + Send + Sync + 'static {
    /// Identity key built from fields that are stable across planes and HA scopes.
    fn key(&self) -> String;

    /// Semantic equality, ignoring row ids regenerated on every write.
    fn same_as(&self, other: &Self) -> bool;

    /// Returns a copy with every device reference rewritten into `target`'s scope.
    fn rescoped(&self, target: &DeviceId) -> Self;
}

/// Reference to a logical switch on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalSwitchRef {
    pub node: DeviceId,
    pub name: String,
}

impl LogicalSwitchRef {
    pub fn new(node: &DeviceId, name: impl Into<String>) -> Self {
        Self {
            node: node.global_node(),
            name: name.into(),
        }
    }

    fn rescoped(&self, target: &DeviceId) -> Self {
        Self {
            node: self.node.rescoped(target),
            name: self.name.clone(),
        }
    }
}

/// Reference to a physical locator (tunnel endpoint) on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocatorRef {
    pub node: DeviceId,
    pub tep: IpAddr,
}

impl LocatorRef {
    pub fn new(node: &DeviceId, tep: IpAddr) -> Self {
        Self {
            node: node.global_node(),
            tep,
        }
    }

    fn rescoped(&self, target: &DeviceId) -> Self {
        Self {
            node: self.node.rescoped(target),
            tep: self.tep,
        }
    }
}

/// A gateway-local broadcast domain, one per attached ELAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSwitch {
    pub name: String,
    /// VXLAN network identifier.
    #[serde(default)]
    pub tunnel_key: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl LogicalSwitch {
    pub fn new(name: impl Into<String>, tunnel_key: u32) -> Self {
        Self {
            name: name.into(),
            tunnel_key: Some(tunnel_key),
            description: None,
            uuid: None,
        }
    }
}

impl HwvtepEntity for LogicalSwitch {
    fn key(&self) -> String {
        self.name.clone()
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tunnel_key == other.tunnel_key
            && self.description == other.description
    }

    fn rescoped(&self, _target: &DeviceId) -> Self {
        self.clone()
    }
}

/// Unicast MAC entry pointing at a single locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UcastMac {
    pub mac: MacAddress,
    pub logical_switch: LogicalSwitchRef,
    pub locator: LocatorRef,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl HwvtepEntity for UcastMac {
    fn key(&self) -> String {
        format!("{}/{}", self.mac, self.logical_switch.name)
    }

    fn same_as(&self, other: &Self) -> bool {
        self.mac == other.mac
            && self.logical_switch == other.logical_switch
            && self.locator == other.locator
            && self.ip == other.ip
    }

    fn rescoped(&self, target: &DeviceId) -> Self {
        Self {
            logical_switch: self.logical_switch.rescoped(target),
            locator: self.locator.rescoped(target),
            ..self.clone()
        }
    }
}

/// Multicast MAC entry pointing at a set of locators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McastMac {
    pub mac: HwvtepMac,
    pub logical_switch: LogicalSwitchRef,
    #[serde(default)]
    pub locator_set: Vec<LocatorRef>,
    #[serde(default)]
    pub uuid: Option<String>,
}

impl McastMac {
    /// Flood entry for unknown destinations on `logical_switch`.
    pub fn unknown_dst(logical_switch: LogicalSwitchRef, locator_set: Vec<LocatorRef>) -> Self {
        Self {
            mac: HwvtepMac::UnknownDst,
            logical_switch,
            locator_set,
            uuid: None,
        }
    }

    /// Returns the locator endpoints, order-insensitive.
    pub fn teps(&self) -> BTreeSet<IpAddr> {
        self.locator_set.iter().map(|locator| locator.tep).collect()
    }

    fn locators(&self) -> BTreeSet<&LocatorRef> {
        self.locator_set.iter().collect()
    }
}

impl HwvtepEntity for McastMac {
    fn key(&self) -> String {
        format!("{}/{}", self.mac, self.logical_switch.name)
    }

    fn same_as(&self, other: &Self) -> bool {
        self.mac == other.mac
            && self.logical_switch == other.logical_switch
            && self.locators() == other.locators()
    }

    fn rescoped(&self, target: &DeviceId) -> Self {
        Self {
            mac: self.mac,
            logical_switch: self.logical_switch.rescoped(target),
            locator_set: self
                .locator_set
                .iter()
                .map(|locator| locator.rescoped(target))
                .collect(),
            uuid: self.uuid.clone(),
        }
    }
}

/// Tunnel endpoint known to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalLocator {
    pub tep: IpAddr,
    #[serde(default = "default_encapsulation")]
    pub encapsulation: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

fn default_encapsulation() -> String {
    VXLAN_OVER_IPV4.to_string()
}

impl PhysicalLocator {
    pub fn vxlan(tep: IpAddr) -> Self {
        Self {
            tep,
            encapsulation: default_encapsulation(),
            uuid: None,
        }
    }
}

impl HwvtepEntity for PhysicalLocator {
    fn key(&self) -> String {
        self.tep.to_string()
    }

    fn same_as(&self, other: &Self) -> bool {
        self.tep == other.tep && self.encapsulation == other.encapsulation
    }

    fn rescoped(&self, _target: &DeviceId) -> Self {
        self.clone()
    }
}

/// Port/VLAN pair bound to a logical switch on a physical switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanBinding {
    pub port: String,
    pub vlan: u16,
    pub logical_switch: LogicalSwitchRef,
}

impl HwvtepEntity for VlanBinding {
    fn key(&self) -> String {
        format!("{}/{}", self.port, self.vlan)
    }

    fn same_as(&self, other: &Self) -> bool {
        self == other
    }

    fn rescoped(&self, target: &DeviceId) -> Self {
        Self {
            port: self.port.clone(),
            vlan: self.vlan,
            logical_switch: self.logical_switch.rescoped(target),
        }
    }
}

/// State held by a global HWVTEP node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalAugmentation {
    pub logical_switches: Vec<LogicalSwitch>,
    pub local_ucast_macs: Vec<UcastMac>,
    pub remote_ucast_macs: Vec<UcastMac>,
    pub local_mcast_macs: Vec<McastMac>,
    pub remote_mcast_macs: Vec<McastMac>,
    pub locators: Vec<PhysicalLocator>,
    /// Names of the physical switches managed by this node.
    pub switches: Vec<String>,
}

/// State held by a physical switch node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalSwitchAugmentation {
    pub name: String,
    pub tunnel_ips: Vec<IpAddr>,
    pub vlan_bindings: Vec<VlanBinding>,
}

/// One device's state on one plane, as read from the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: DeviceId,
    #[serde(default)]
    pub global: Option<GlobalAugmentation>,
    #[serde(default)]
    pub physical_switch: Option<PhysicalSwitchAugmentation>,
}

impl DeviceSnapshot {
    /// Snapshot of a device with no state.
    pub fn empty(device: DeviceId) -> Self {
        Self {
            device,
            global: None,
            physical_switch: None,
        }
    }

    /// Physical switches managed by this node (empty for physical switch nodes).
    pub fn switches(&self) -> &[String] {
        self.global
            .as_ref()
            .map(|global| global.switches.as_slice())
            .unwrap_or(&[])
    }
}

/// Entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    LogicalSwitch,
    LocalUcastMac,
    RemoteUcastMac,
    LocalMcastMac,
    RemoteMcastMac,
    PhysicalLocator,
    VlanBinding,
}

impl EntityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LogicalSwitch => "logical_switch",
            EntityKind::LocalUcastMac => "local_ucast_mac",
            EntityKind::RemoteUcastMac => "remote_ucast_mac",
            EntityKind::LocalMcastMac => "local_mcast_mac",
            EntityKind::RemoteMcastMac => "remote_mcast_mac",
            EntityKind::PhysicalLocator => "physical_locator",
            EntityKind::VlanBinding => "vlan_binding",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record tagged with its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum EntityItem {
    LogicalSwitch(LogicalSwitch),
    LocalUcastMac(UcastMac),
    RemoteUcastMac(UcastMac),
    LocalMcastMac(McastMac),
    RemoteMcastMac(McastMac),
    PhysicalLocator(PhysicalLocator),
    VlanBinding(VlanBinding),
}

impl EntityItem {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityItem::LogicalSwitch(_) => EntityKind::LogicalSwitch,
            EntityItem::LocalUcastMac(_) => EntityKind::LocalUcastMac,
            EntityItem::RemoteUcastMac(_) => EntityKind::RemoteUcastMac,
            EntityItem::LocalMcastMac(_) => EntityKind::LocalMcastMac,
            EntityItem::RemoteMcastMac(_) => EntityKind::RemoteMcastMac,
            EntityItem::PhysicalLocator(_) => EntityKind::PhysicalLocator,
            EntityItem::VlanBinding(_) => EntityKind::VlanBinding,
        }
    }

    pub fn key(&self) -> String {
        match self {
            EntityItem::LogicalSwitch(item) => item.key(),
            EntityItem::LocalUcastMac(item) | EntityItem::RemoteUcastMac(item) => item.key(),
            EntityItem::LocalMcastMac(item) | EntityItem::RemoteMcastMac(item) => item.key(),
            EntityItem::PhysicalLocator(item) => item.key(),
            EntityItem::VlanBinding(item) => item.key(),
        }
    }
}
