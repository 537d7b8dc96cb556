//! HA parent/child topology index.

use parking_lot::RwLock;
use sonic_l2gw_types::DeviceId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::error::{L2gwError, Result};

#[derive(Debug, Default)]
struct HaMaps {
    children: BTreeMap<DeviceId, BTreeSet<DeviceId>>,
    parent_of: BTreeMap<DeviceId, DeviceId>,
}

/// Mapping of HA parent devices to their physical children.
///
/// Each child has exactly one parent, and a parent is never itself a child,
/// so the relationship cannot form a cycle. Readers always get a copy taken
/// under the lock, never a view that a concurrent write can tear.
#[derive(Debug, Default)]
pub struct HaTopologyIndex {
    maps: RwLock<HaMaps>,
}

impl HaTopologyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every parent.
    pub fn parents(&self) -> BTreeSet<DeviceId> {
        self.maps.read().children.keys().cloned().collect()
    }

    /// Returns the children of `parent` (empty if unknown).
    pub fn children(&self, parent: &DeviceId) -> BTreeSet<DeviceId> {
        self.maps
            .read()
            .children
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_parent(&self, device: &DeviceId) -> bool {
        self.maps.read().children.contains_key(device)
    }

    pub fn is_child(&self, device: &DeviceId) -> bool {
        self.maps.read().parent_of.contains_key(device)
    }

    pub fn parent_of(&self, child: &DeviceId) -> Option<DeviceId> {
        self.maps.read().parent_of.get(child).cloned()
    }

    /// Returns a consistent copy of every group.
    pub fn snapshot(&self) -> BTreeMap<DeviceId, BTreeSet<DeviceId>> {
        self.maps.read().children.clone()
    }

    /// Adds `child` under `parent`.
    ///
    /// Re-adding an existing relationship is a no-op. Fails if the device is
    /// its own child, if `child` is a parent, if `parent` is a child, or if
    /// `child` already belongs to another parent.
    pub fn add_child(&self, parent: &DeviceId, child: &DeviceId) -> Result<()> {
        let mut maps = self.maps.write();
        if parent == child {
            return Err(L2gwError::invalid_ha(parent, child, "device cannot be its own child"));
        }
        if maps.children.contains_key(child) {
            return Err(L2gwError::invalid_ha(parent, child, "child is an HA parent"));
        }
        if maps.parent_of.contains_key(parent) {
            return Err(L2gwError::invalid_ha(parent, child, "parent is an HA child"));
        }
        match maps.parent_of.get(child) {
            Some(existing) if existing == parent => return Ok(()),
            Some(existing) => {
                let reason = format!("child already belongs to {}", existing);
                return Err(L2gwError::invalid_ha(parent, child, reason));
            }
            None => {}
        }

        maps.parent_of.insert(child.clone(), parent.clone());
        maps.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        info!(%parent, %child, "HA child added");
        Ok(())
    }

    /// Removes `child`; returns its former parent. A parent left without
    /// children is removed too.
    pub fn remove_child(&self, child: &DeviceId) -> Option<DeviceId> {
        let mut maps = self.maps.write();
        let parent = maps.parent_of.remove(child)?;
        let now_empty = match maps.children.get_mut(&parent) {
            Some(children) => {
                children.remove(child);
                children.is_empty()
            }
            None => false,
        };
        if now_empty {
            maps.children.remove(&parent);
        }
        info!(%parent, %child, "HA child removed");
        Some(parent)
    }

    /// Removes `parent` and returns the children it had.
    pub fn remove_parent(&self, parent: &DeviceId) -> BTreeSet<DeviceId> {
        let mut maps = self.maps.write();
        let children = maps.children.remove(parent).unwrap_or_default();
        for child in &children {
            maps.parent_of.remove(child);
        }
        if !children.is_empty() {
            info!(%parent, count = children.len(), "HA parent removed");
        }
        children
    }
}
