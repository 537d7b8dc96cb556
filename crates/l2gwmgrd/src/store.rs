//! Data store boundary.
//!
//! The data store holds every device's state on two planes and commits a
//! [`MutationBatch`] atomically. [`MemoryDataStore`] is the in-process
//! implementation used in standalone mode, offline validation and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sonic_l2gw_types::{DeviceId, Plane};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::entities::{
    DeviceSnapshot, EntityItem, EntityKind, GlobalAugmentation, HwvtepEntity,
    PhysicalSwitchAugmentation,
};
use crate::error::{L2gwError, Result};

/// One state change on one device and plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Create or replace the item with the same key.
    Put {
        device: DeviceId,
        plane: Plane,
        item: EntityItem,
    },
    /// Remove the item with `key`, if present.
    Delete {
        device: DeviceId,
        plane: Plane,
        kind: EntityKind,
        key: String,
    },
}

impl Mutation {
    pub fn device(&self) -> &DeviceId {
        match self {
            Mutation::Put { device, .. } | Mutation::Delete { device, .. } => device,
        }
    }
}

/// Mutations committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, device: &DeviceId, plane: Plane, item: EntityItem) {
        self.mutations.push(Mutation::Put {
            device: device.clone(),
            plane,
            item,
        });
    }

    pub fn delete(&mut self, device: &DeviceId, plane: Plane, kind: EntityKind, key: impl Into<String>) {
        self.mutations.push(Mutation::Delete {
            device: device.clone(),
            plane,
            kind,
            key: key.into(),
        });
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

/// Transactional two-plane state store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Reads one device on one plane. A device with no state reads as an empty snapshot.
    async fn read_snapshot(&self, device: &DeviceId, plane: Plane) -> Result<DeviceSnapshot>;

    /// Commits `batch` atomically.
    async fn write_batch(&self, batch: MutationBatch) -> Result<()>;
}

/// HA group in a state dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaGroup {
    pub parent: DeviceId,
    #[serde(default)]
    pub children: Vec<DeviceId>,
}

/// Serialized store contents, as produced by a state dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreDump {
    pub config: Vec<DeviceSnapshot>,
    pub operational: Vec<DeviceSnapshot>,
    pub ha: Vec<HaGroup>,
}

impl StoreDump {
    /// Loads a dump from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every device appearing on either plane.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.config
            .iter()
            .chain(self.operational.iter())
            .map(|snapshot| snapshot.device.clone())
            .collect()
    }
}

/// In-memory [`DataStore`] with failure injection.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    state: RwLock<HashMap<(DeviceId, Plane), DeviceSnapshot>>,
    unreachable: RwLock<BTreeSet<DeviceId>>,
    failing_writes: AtomicU32,
    batches_written: AtomicU64,
    mutations_written: AtomicU64,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the contents of `dump`.
    pub fn from_dump(dump: &StoreDump) -> Self {
        let store = Self::new();
        for snapshot in &dump.config {
            store.insert_snapshot(Plane::Config, snapshot.clone());
        }
        for snapshot in &dump.operational {
            store.insert_snapshot(Plane::Operational, snapshot.clone());
        }
        store
    }

    /// Replaces a device's state on `plane`.
    pub fn insert_snapshot(&self, plane: Plane, snapshot: DeviceSnapshot) {
        self.state
            .write()
            .insert((snapshot.device.clone(), plane), snapshot);
    }

    /// Returns a device's current state without going through the async boundary.
    pub fn snapshot(&self, device: &DeviceId, plane: Plane) -> DeviceSnapshot {
        self.state
            .read()
            .get(&(device.clone(), plane))
            .cloned()
            .unwrap_or_else(|| DeviceSnapshot::empty(device.clone()))
    }

    /// Makes reads of `device` fail until cleared.
    pub fn set_unreachable(&self, device: &DeviceId, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable {
            set.insert(device.clone());
        } else {
            set.remove(device);
        }
    }

    /// Makes the next `count` batch writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of batches committed.
    pub fn batches_written(&self) -> u64 {
        self.batches_written.load(Ordering::SeqCst)
    }

    /// Number of mutations committed.
    pub fn mutations_written(&self) -> u64 {
        self.mutations_written.load(Ordering::SeqCst)
    }

    fn take_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn read_snapshot(&self, device: &DeviceId, plane: Plane) -> Result<DeviceSnapshot> {
        if self.unreachable.read().contains(device) {
            return Err(L2gwError::store(
                "read",
                format!("{} unreachable on {} plane", device, plane),
            ));
        }
        Ok(self.snapshot(device, plane))
    }

    async fn write_batch(&self, batch: MutationBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.take_write_failure() {
            warn!(mutations = batch.len(), "injected write failure");
            return Err(L2gwError::store("write_batch", "injected failure"));
        }

        let count = batch.len() as u64;
        let mut state = self.state.write();
        for mutation in batch.mutations {
            apply(&mut state, mutation);
        }
        drop(state);

        self.batches_written.fetch_add(1, Ordering::SeqCst);
        self.mutations_written.fetch_add(count, Ordering::SeqCst);
        debug!(mutations = count, "batch committed");
        Ok(())
    }
}

fn apply(state: &mut HashMap<(DeviceId, Plane), DeviceSnapshot>, mutation: Mutation) {
    match mutation {
        Mutation::Put { device, plane, item } => {
            let snapshot = state
                .entry((device.clone(), plane))
                .or_insert_with(|| DeviceSnapshot::empty(device.clone()));
            put_item(snapshot, item);
        }
        Mutation::Delete {
            device,
            plane,
            kind,
            key,
        } => {
            if let Some(snapshot) = state.get_mut(&(device, plane)) {
                delete_item(snapshot, kind, &key);
            }
        }
    }
}

fn upsert<T: HwvtepEntity>(items: &mut Vec<T>, item: T) {
    let key = item.key();
    match items.iter_mut().find(|existing| existing.key() == key) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn remove<T: HwvtepEntity>(items: &mut Vec<T>, key: &str) {
    items.retain(|existing| existing.key() != key);
}

fn put_item(snapshot: &mut DeviceSnapshot, item: EntityItem) {
    if let EntityItem::VlanBinding(binding) = item {
        let name = snapshot.device.switch_name().unwrap_or_default().to_string();
        let ps = snapshot
            .physical_switch
            .get_or_insert_with(|| PhysicalSwitchAugmentation {
                name,
                ..Default::default()
            });
        upsert(&mut ps.vlan_bindings, binding);
        return;
    }

    let global = snapshot.global.get_or_insert_with(GlobalAugmentation::default);
    match item {
        EntityItem::LogicalSwitch(ls) => upsert(&mut global.logical_switches, ls),
        EntityItem::LocalUcastMac(mac) => upsert(&mut global.local_ucast_macs, mac),
        EntityItem::RemoteUcastMac(mac) => upsert(&mut global.remote_ucast_macs, mac),
        EntityItem::LocalMcastMac(mac) => upsert(&mut global.local_mcast_macs, mac),
        EntityItem::RemoteMcastMac(mac) => upsert(&mut global.remote_mcast_macs, mac),
        EntityItem::PhysicalLocator(locator) => upsert(&mut global.locators, locator),
        EntityItem::VlanBinding(_) => {}
    }
}

fn delete_item(snapshot: &mut DeviceSnapshot, kind: EntityKind, key: &str) {
    if kind == EntityKind::VlanBinding {
        if let Some(ps) = snapshot.physical_switch.as_mut() {
            remove(&mut ps.vlan_bindings, key);
        }
        return;
    }

    let Some(global) = snapshot.global.as_mut() else {
        return;
    };
    match kind {
        EntityKind::LogicalSwitch => remove(&mut global.logical_switches, key),
        EntityKind::LocalUcastMac => remove(&mut global.local_ucast_macs, key),
        EntityKind::RemoteUcastMac => remove(&mut global.remote_ucast_macs, key),
        EntityKind::LocalMcastMac => remove(&mut global.local_mcast_macs, key),
        EntityKind::RemoteMcastMac => remove(&mut global.remote_mcast_macs, key),
        EntityKind::PhysicalLocator => remove(&mut global.locators, key),
        EntityKind::VlanBinding => {}
    }
}
