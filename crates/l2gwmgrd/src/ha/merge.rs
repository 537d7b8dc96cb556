//! Entity extractors ("merge commands").
//!
//! A [`MergeCommand`] knows how to pull one entity table out of a
//! [`DeviceSnapshot`] and how to compare its rows across planes or HA scopes.
//! The engine and the sync job work with the type-erased
//! [`EntityComparator`] so that all tables live in one registry.

use sonic_l2gw_types::DeviceId;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entities::{
    DeviceSnapshot, EntityItem, EntityKind, HwvtepEntity, LogicalSwitch, McastMac,
    PhysicalLocator, UcastMac, VlanBinding,
};

/// Extractor for one entity table.
pub trait MergeCommand: Send + Sync + 'static {
    type Item: HwvtepEntity;

    fn kind(&self) -> EntityKind;

    /// Human-readable table name used in reports.
    fn description(&self) -> &'static str;

    /// Returns the table rows, or nothing if the snapshot lacks the augmentation.
    fn extract(&self, snapshot: &DeviceSnapshot) -> Vec<Self::Item>;

    /// Wraps a row for a data store mutation.
    fn wrap(&self, item: Self::Item) -> EntityItem;

    fn key(&self, item: &Self::Item) -> String {
        item.key()
    }

    /// Rewrites every device reference in `items` into `target`'s scope.
    fn transform(&self, target: &DeviceId, items: Vec<Self::Item>) -> Vec<Self::Item> {
        items.iter().map(|item| item.rescoped(target)).collect()
    }

    fn equals(&self, a: &Self::Item, b: &Self::Item) -> bool {
        a.same_as(b)
    }
}

/// Result of diffing two row lists `A` and `B`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDiff<T> {
    /// Rows of A absent from B or different in B, taken from A.
    pub missing: Vec<T>,
    /// Rows of B whose key is absent from A.
    pub extra: Vec<T>,
}

impl<T> ItemDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Diffs two row lists by key. Results are ordered by key.
pub fn diff_items<C: MergeCommand>(
    command: &C,
    left: Vec<C::Item>,
    right: Vec<C::Item>,
) -> ItemDiff<C::Item> {
    let left: BTreeMap<String, C::Item> = left
        .into_iter()
        .map(|item| (command.key(&item), item))
        .collect();
    let mut right: BTreeMap<String, C::Item> = right
        .into_iter()
        .map(|item| (command.key(&item), item))
        .collect();

    let mut missing = Vec::new();
    for (key, item) in left {
        match right.remove(&key) {
            Some(other) if command.equals(&item, &other) => {}
            _ => missing.push(item),
        }
    }
    ItemDiff {
        missing,
        extra: right.into_values().collect(),
    }
}

/// Which side of a comparison is rewritten before diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rescope<'a> {
    /// Compare as read (same device, two planes).
    None,
    /// Rewrite the left side into the given device's scope.
    Left(&'a DeviceId),
    /// Rewrite the right side into the given device's scope.
    Right(&'a DeviceId),
}

/// Type-erased diff of one table between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDiff {
    pub kind: EntityKind,
    pub description: &'static str,
    pub missing: Vec<EntityItem>,
    pub extra: Vec<EntityItem>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn missing_keys(&self) -> Vec<String> {
        self.missing.iter().map(EntityItem::key).collect()
    }

    pub fn extra_keys(&self) -> Vec<String> {
        self.extra.iter().map(EntityItem::key).collect()
    }
}

/// Object-safe view of a [`MergeCommand`].
pub trait EntityComparator: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn description(&self) -> &'static str;

    /// Diffs this table between `left` and `right`.
    fn compare(&self, left: &DeviceSnapshot, right: &DeviceSnapshot, rescope: Rescope<'_>) -> EntityDiff;
}

impl<C: MergeCommand> EntityComparator for C {
    fn kind(&self) -> EntityKind {
        MergeCommand::kind(self)
    }

    fn description(&self) -> &'static str {
        MergeCommand::description(self)
    }

    fn compare(&self, left: &DeviceSnapshot, right: &DeviceSnapshot, rescope: Rescope<'_>) -> EntityDiff {
        let mut left_items = self.extract(left);
        let mut right_items = self.extract(right);
        match rescope {
            Rescope::None => {}
            Rescope::Left(target) => left_items = self.transform(target, left_items),
            Rescope::Right(target) => right_items = self.transform(target, right_items),
        }

        let diff = diff_items(self, left_items, right_items);
        EntityDiff {
            kind: MergeCommand::kind(self),
            description: MergeCommand::description(self),
            missing: diff.missing.into_iter().map(|item| self.wrap(item)).collect(),
            extra: diff.extra.into_iter().map(|item| self.wrap(item)).collect(),
        }
    }
}

macro_rules! global_command {
    ($name:ident, $item:ty, $kind:ident, $field:ident, $description:literal) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl MergeCommand for $name {
            type Item = $item;

            fn kind(&self) -> EntityKind {
                EntityKind::$kind
            }

            fn description(&self) -> &'static str {
                $description
            }

            fn extract(&self, snapshot: &DeviceSnapshot) -> Vec<$item> {
                snapshot
                    .global
                    .as_ref()
                    .map(|global| global.$field.clone())
                    .unwrap_or_default()
            }

            fn wrap(&self, item: $item) -> EntityItem {
                EntityItem::$kind(item)
            }
        }
    };
}

global_command!(LogicalSwitchCommand, LogicalSwitch, LogicalSwitch, logical_switches, "logical switches");
global_command!(LocalUcastMacCommand, UcastMac, LocalUcastMac, local_ucast_macs, "local unicast MACs");
global_command!(RemoteUcastMacCommand, UcastMac, RemoteUcastMac, remote_ucast_macs, "remote unicast MACs");
global_command!(LocalMcastMacCommand, McastMac, LocalMcastMac, local_mcast_macs, "local multicast MACs");
global_command!(RemoteMcastMacCommand, McastMac, RemoteMcastMac, remote_mcast_macs, "remote multicast MACs");
global_command!(PhysicalLocatorCommand, PhysicalLocator, PhysicalLocator, locators, "physical locators");

/// VLAN bindings of a physical switch node.
#[derive(Debug, Clone, Copy, Default)]
pub struct VlanBindingCommand;

impl MergeCommand for VlanBindingCommand {
    type Item = VlanBinding;

    fn kind(&self) -> EntityKind {
        EntityKind::VlanBinding
    }

    fn description(&self) -> &'static str {
        "VLAN bindings"
    }

    fn extract(&self, snapshot: &DeviceSnapshot) -> Vec<VlanBinding> {
        snapshot
            .physical_switch
            .as_ref()
            .map(|ps| ps.vlan_bindings.clone())
            .unwrap_or_default()
    }

    fn wrap(&self, item: VlanBinding) -> EntityItem {
        EntityItem::VlanBinding(item)
    }
}

/// Registry of every extractor, global tables first.
pub fn default_commands() -> Vec<Arc<dyn EntityComparator>> {
    vec![
        Arc::new(LogicalSwitchCommand),
        Arc::new(LocalUcastMacCommand),
        Arc::new(RemoteUcastMacCommand),
        Arc::new(LocalMcastMacCommand),
        Arc::new(RemoteMcastMacCommand),
        Arc::new(PhysicalLocatorCommand),
        Arc::new(VlanBindingCommand),
    ]
}
