//! Device identifiers for HWVTEP gateways and forwarding switches.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path segment separating a global HWVTEP node from one of its physical switches.
pub const PHYSICAL_SWITCH_SEGMENT: &str = "/physicalswitch/";

/// Identifier of an HWVTEP node.
///
/// A node is either a *global* node (`hwvtep://uuid/<id>`), which owns the
/// logical switches and MAC tables, or a *physical switch* node
/// (`<global>/physicalswitch/<name>`), which owns ports and VLAN bindings.
/// HA parents and children use the same format.
///
/// # Examples
///
/// ```
/// use sonic_l2gw_types::DeviceId;
///
/// let global = DeviceId::new("hwvtep://uuid/gw1");
/// let ps = global.physical_switch("tor1");
/// assert_eq!(ps.as_str(), "hwvtep://uuid/gw1/physicalswitch/tor1");
/// assert_eq!(ps.global_node(), global);
/// assert_eq!(ps.switch_name(), Some("tor1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this id names a physical switch node.
    pub fn is_physical_switch(&self) -> bool {
        self.0.contains(PHYSICAL_SWITCH_SEGMENT)
    }

    /// Returns the physical switch name, for physical switch nodes.
    pub fn switch_name(&self) -> Option<&str> {
        self.0
            .split_once(PHYSICAL_SWITCH_SEGMENT)
            .map(|(_, name)| name)
    }

    /// Returns the global node owning this id (itself for global nodes).
    pub fn global_node(&self) -> DeviceId {
        match self.0.split_once(PHYSICAL_SWITCH_SEGMENT) {
            Some((global, _)) => DeviceId(global.to_string()),
            None => self.clone(),
        }
    }

    /// Returns the id of the named physical switch under this node's global node.
    pub fn physical_switch(&self, name: &str) -> DeviceId {
        DeviceId(format!(
            "{}{}{}",
            self.global_node().0,
            PHYSICAL_SWITCH_SEGMENT,
            name
        ))
    }

    /// Returns this id rewritten into the scope of `target`.
    ///
    /// A global id maps to `target`'s global node; a physical switch id maps to
    /// the switch of the same name under `target`.
    pub fn rescoped(&self, target: &DeviceId) -> DeviceId {
        match self.switch_name() {
            Some(name) => target.physical_switch(name),
            None => target.global_node(),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.ends_with(PHYSICAL_SWITCH_SEGMENT) {
            return Err(ParseError::InvalidDeviceId(s.to_string()));
        }
        Ok(DeviceId(trimmed.to_string()))
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

/// Datapath identifier of a forwarding switch participating in the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DpnId(u64);

impl DpnId {
    /// Creates a DPN id.
    pub const fn new(id: u64) -> Self {
        DpnId(id)
    }

    /// Returns the raw datapath id.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DpnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DpnId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("openflow:").unwrap_or(s);
        raw.parse::<u64>()
            .map(DpnId)
            .map_err(|_| ParseError::InvalidDpnId(s.to_string()))
    }
}
