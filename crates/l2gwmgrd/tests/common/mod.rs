//! Shared fixtures for l2gwmgrd integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use sonic_l2gw_common::{AlwaysOwner, JobCallbacks, JobError, TokioScheduler};
use sonic_l2gw_types::{DeviceId, DpnId, MacAddress};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use l2gwmgrd::entities::{
    GlobalAugmentation, LocatorRef, LogicalSwitchRef, McastMac, UcastMac,
};
use l2gwmgrd::{
    Collaborators, DeviceSnapshot, ElanInstance, L2GatewayDevice, L2GwManager, L2gwConfig,
    MemoryDataStore, MemoryFlowProgrammer, PortBinding, StaticTunnelResolver,
};

pub const ELAN: &str = "net1";
pub const VNI: u32 = 100;
pub const ELAN_TAG: u32 = 5000;

/// Records terminal outcomes reported by the coordinator.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub failed: Mutex<Vec<(String, String)>>,
    pub skipped: Mutex<Vec<(String, String)>>,
}

impl JobCallbacks for RecordingCallbacks {
    fn on_job_failed(&self, key: &str, job: &str, _error: &JobError) {
        self.failed.lock().push((key.to_string(), job.to_string()));
    }

    fn on_job_skipped(&self, key: &str, job: &str) {
        self.skipped.lock().push((key.to_string(), job.to_string()));
    }
}

/// A manager wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub manager: L2GwManager,
    pub store: Arc<MemoryDataStore>,
    pub flows: Arc<MemoryFlowProgrammer>,
    pub tunnels: Arc<StaticTunnelResolver>,
    pub callbacks: Arc<RecordingCallbacks>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: L2gwConfig) -> Self {
        let store = Arc::new(MemoryDataStore::new());
        let flows = Arc::new(MemoryFlowProgrammer::new());
        let tunnels = Arc::new(StaticTunnelResolver::new());
        let callbacks = Arc::new(RecordingCallbacks::default());

        let manager = L2GwManager::new(
            &config,
            Collaborators {
                store: store.clone(),
                flows: flows.clone(),
                tunnels: tunnels.clone(),
                leadership: Arc::new(AlwaysOwner),
                scheduler: Arc::new(TokioScheduler),
                callbacks: Some(callbacks.clone()),
            },
        );

        Self {
            manager,
            store,
            flows,
            tunnels,
            callbacks,
        }
    }

    /// Registers `net1` and a DPN endpoint for each of `dpns`.
    pub fn with_elan(self, dpns: &[(u64, &str)]) -> Self {
        self.manager.add_elan(elan());
        for (dpn, tep) in dpns {
            self.tunnels.set_dpn_tep(DpnId::new(*dpn), ip(tep));
        }
        self
    }

    pub async fn settle(&self) {
        self.manager.wait_idle().await;
    }
}

/// Defaults with short retries so failing tests do not wait long.
pub fn test_config() -> L2gwConfig {
    let mut config = L2gwConfig::default();
    config.coordinator.retry_base_delay_ms = 1;
    config
}

pub fn elan() -> ElanInstance {
    ElanInstance {
        name: ELAN.to_string(),
        vni: VNI,
        elan_tag: ELAN_TAG,
    }
}

pub fn gw(name: &str) -> DeviceId {
    DeviceId::new(format!("hwvtep://uuid/{}", name))
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

pub fn gateway(name: &str, tep: &str) -> L2GatewayDevice {
    L2GatewayDevice {
        device: gw(name),
        name: name.to_string(),
        tunnel_ip: Some(ip(tep)),
    }
}

pub fn binding(switch: &str, port: &str, vlan: u16) -> PortBinding {
    PortBinding {
        switch: switch.to_string(),
        port: port.to_string(),
        vlan,
    }
}

pub fn ucast(node: &DeviceId, elan: &str, address: &str, tep: &str) -> UcastMac {
    UcastMac {
        mac: mac(address),
        logical_switch: LogicalSwitchRef::new(node, elan),
        locator: LocatorRef::new(node, ip(tep)),
        ip: None,
        uuid: None,
    }
}

pub fn unknown_dst(node: &DeviceId, elan: &str, teps: &[&str]) -> McastMac {
    McastMac::unknown_dst(
        LogicalSwitchRef::new(node, elan),
        teps.iter().map(|tep| LocatorRef::new(node, ip(tep))).collect(),
    )
}

pub fn global_snapshot(device: &DeviceId, global: GlobalAugmentation) -> DeviceSnapshot {
    DeviceSnapshot {
        device: device.clone(),
        global: Some(global),
        physical_switch: None,
    }
}

/// Lets spawned workers and timers make progress under paused time.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
