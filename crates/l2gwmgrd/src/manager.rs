//! L2GwManager - event surface of the daemon
//!
//! Event flow:
//! 1. ELAN, DPN, device, connection and HA events update the topology caches
//! 2. The affected jobs are submitted to the coordinator under their keys
//! 3. Jobs read the caches and device state when they run
//!
//! Handlers never touch the data store or the flow tables directly.

use sonic_l2gw_common::{
    AlwaysOwner, DelayScheduler, JobCallbacks, JobCoordinator, LeadershipCheck, TokioScheduler,
};
use sonic_l2gw_types::{DeviceId, DpnId};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ElanInstance, L2GatewayDevice, PortBinding, TopologyState};
use crate::config::L2gwConfig;
use crate::error::Result;
use crate::flow::{FlowProgrammer, MemoryFlowProgrammer, StaticTunnelResolver, TunnelResolver};
use crate::ha::ReconciliationEngine;
use crate::jobs::{
    device_elan_key, elan_key, AssociateJob, BroadcastGroupJob, DisassociateJob, DmacJob,
    HaConfigSyncJob, JobContext, JobSettings, LogicalSwitchDeletions, McastMacUpdateJob,
};
use crate::store::DataStore;

/// External systems the manager drives.
pub struct Collaborators {
    pub store: Arc<dyn DataStore>,
    pub flows: Arc<dyn FlowProgrammer>,
    pub tunnels: Arc<dyn TunnelResolver>,
    pub leadership: Arc<dyn LeadershipCheck>,
    pub scheduler: Arc<dyn DelayScheduler>,
    pub callbacks: Option<Arc<dyn JobCallbacks>>,
}

impl Collaborators {
    /// In-process collaborators around `store`, for standalone mode.
    pub fn in_memory(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            flows: Arc::new(MemoryFlowProgrammer::new()),
            tunnels: Arc::new(StaticTunnelResolver::new()),
            leadership: Arc::new(AlwaysOwner),
            scheduler: Arc::new(TokioScheduler),
            callbacks: None,
        }
    }
}

/// Maintains L2 gateway state from topology events.
pub struct L2GwManager {
    ctx: JobContext,
    display_limit: usize,
}

impl L2GwManager {
    /// Creates a manager with empty caches.
    pub fn new(config: &L2gwConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            flows,
            tunnels,
            leadership,
            scheduler,
            callbacks,
        } = collaborators;

        let mut builder = JobCoordinator::builder(config.coordinator_config()).leadership(leadership);
        if let Some(callbacks) = callbacks {
            builder = builder.callbacks(callbacks);
        }

        let settings = JobSettings {
            max_retries: config.coordinator.default_max_retries,
            owner_only: config.elan.owner_only_jobs,
            ls_delete_delay: config.logical_switch_delete_delay(),
        };

        Self {
            ctx: JobContext {
                store,
                flows,
                tunnels,
                topology: Arc::new(TopologyState::new()),
                coordinator: builder.build(),
                scheduler,
                deletions: Arc::new(LogicalSwitchDeletions::new()),
                settings,
            },
            display_limit: config.validation.display_limit,
        }
    }

    pub fn topology(&self) -> &Arc<TopologyState> {
        &self.ctx.topology
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.ctx.coordinator
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Returns true while the logical switch of `elan` on `device` is
    /// scheduled for deletion.
    pub fn deletion_pending(&self, elan: &str, device: &DeviceId) -> bool {
        self.ctx.deletions.is_pending(&device_elan_key(device, elan))
    }

    #[instrument(skip(self), fields(elan = %elan.name))]
    pub fn add_elan(&self, elan: ElanInstance) {
        info!(vni = elan.vni, tag = elan.elan_tag, "ELAN added");
        let name = elan.name.clone();
        self.ctx.topology.elans.add(elan);

        for gateway in self.ctx.topology.gateways.devices_for_elan(&name) {
            self.submit_associate(&name, &gateway.device);
        }
        self.ctx.submit_broadcast(&name);
    }

    /// Detaches every gateway from `elan`, removes its DMAC flows and flood
    /// groups from the DPNs, and forgets it.
    #[instrument(skip(self))]
    pub fn remove_elan(&self, elan: &str) {
        let Some(removed) = self.ctx.topology.elans.remove(elan) else {
            debug!("unknown ELAN");
            return;
        };
        info!("ELAN removed");

        let devices = self.gateway_ids(elan);
        if !devices.is_empty() {
            for dpn in self.ctx.topology.dpns.dpns(elan) {
                self.ctx.submit_dmac(DmacJob::teardown(
                    self.ctx.clone(),
                    removed.clone(),
                    dpn,
                    devices.clone(),
                ));
            }
        }
        let teardown = BroadcastGroupJob::teardown(self.ctx.clone(), removed);
        self.ctx.submit(elan_key(elan), Arc::new(teardown));

        for gateway in self.ctx.topology.gateways.devices_for_elan(elan) {
            let bindings: Vec<PortBinding> = self
                .ctx
                .topology
                .gateways
                .bindings(elan, &gateway.device)
                .into_iter()
                .collect();
            self.ctx.topology.gateways.disconnect(elan, &gateway.device, &bindings);
            self.submit_disassociate(elan, &gateway.device, bindings);
        }
    }

    #[instrument(skip(self), fields(dpn = %dpn))]
    pub fn on_dpn_interface_added(&self, elan: &str, dpn: DpnId, interface: &str) {
        if !self.ctx.topology.dpns.add_interface(elan, dpn, interface) {
            debug!(interface, "DPN already carries the ELAN");
            return;
        }
        info!(interface, "DPN joined ELAN");

        let devices = self.gateway_ids(elan);
        for device in &devices {
            self.ctx
                .submit_mcast(McastMacUpdateJob::new(self.ctx.clone(), elan, device));
        }
        self.ctx.submit_broadcast(elan);
        if !devices.is_empty() {
            self.ctx
                .submit_dmac(DmacJob::install(self.ctx.clone(), elan, dpn, devices));
        }
    }

    #[instrument(skip(self), fields(dpn = %dpn))]
    pub fn on_dpn_interface_removed(&self, elan: &str, dpn: DpnId, interface: &str) {
        if !self.ctx.topology.dpns.remove_interface(elan, dpn, interface) {
            debug!(interface, "DPN still carries the ELAN");
            return;
        }
        info!(interface, "DPN left ELAN");

        let devices = self.gateway_ids(elan);
        for device in &devices {
            self.ctx
                .submit_mcast(McastMacUpdateJob::new(self.ctx.clone(), elan, device));
        }
        self.ctx.submit_broadcast(elan);
        if !devices.is_empty() {
            self.ctx
                .submit_dmac(DmacJob::uninstall(self.ctx.clone(), elan, dpn, devices));
        }
    }

    /// Drops `tep` from every gateway's flood list.
    #[instrument(skip(self))]
    pub fn on_tunnel_endpoint_removed(&self, tep: IpAddr) {
        for elan in self.ctx.topology.elans.names() {
            for device in self.gateway_ids(&elan) {
                self.ctx.submit_mcast(
                    McastMacUpdateJob::new(self.ctx.clone(), &elan, &device).excluding(Some(tep)),
                );
            }
        }
    }

    /// Records a connected device and replays its ELAN attachments.
    #[instrument(skip(self), fields(device = %device.device))]
    pub fn on_device_connected(&self, device: L2GatewayDevice) {
        let id = device.device.global_node();
        info!(tunnel_ip = ?device.tunnel_ip, "gateway device connected");
        self.ctx.topology.gateways.add_device(L2GatewayDevice {
            device: id.clone(),
            ..device
        });

        for elan in self.ctx.topology.gateways.elans_for_device(&id) {
            self.submit_associate(&elan, &id);
        }
    }

    /// Forgets a device; its attachments are kept for the next connection.
    #[instrument(skip(self))]
    pub fn on_device_disconnected(&self, device: &DeviceId) {
        let Some(gone) = self.ctx.topology.gateways.remove_device(&device.global_node()) else {
            debug!("unknown device");
            return;
        };
        info!("gateway device disconnected");

        for elan in self.ctx.topology.gateways.elans_for_device(&gone.device) {
            for other in self.gateway_ids(&elan) {
                self.ctx.submit_mcast(
                    McastMacUpdateJob::new(self.ctx.clone(), &elan, &other).excluding(gone.tunnel_ip),
                );
            }
            self.ctx.submit_broadcast(&elan);
        }
    }

    #[instrument(skip(self, bindings), fields(bindings = bindings.len()))]
    pub fn on_connection_added(&self, elan: &str, device: &DeviceId, bindings: &[PortBinding]) {
        let device = device.global_node();
        if self.ctx.topology.gateways.connect(elan, &device, bindings) {
            info!(%device, "device attached to ELAN");
        }
        self.submit_associate(elan, &device);
    }

    #[instrument(skip(self, bindings), fields(bindings = bindings.len()))]
    pub fn on_connection_removed(&self, elan: &str, device: &DeviceId, bindings: &[PortBinding]) {
        let device = device.global_node();
        if self.ctx.topology.gateways.disconnect(elan, &device, bindings) {
            info!(%device, "device detached from ELAN");
        }
        if !self.ctx.topology.gateways.is_connected(elan, &device) {
            // Stop flooding towards the DPNs until a reattach refreshes the entry.
            self.ctx.submit_mcast(
                McastMacUpdateJob::new(self.ctx.clone(), elan, &device).without_dpn_teps(),
            );
        }
        self.submit_disassociate(elan, &device, bindings.to_vec());
    }

    /// Records an HA relationship and pushes the parent's configuration to it.
    #[instrument(skip(self))]
    pub fn on_ha_child_added(&self, parent: &DeviceId, child: &DeviceId) -> Result<()> {
        self.ctx.topology.ha.add_child(parent, child)?;
        info!(%parent, %child, "HA child added");
        self.submit_ha_sync(parent);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn on_ha_child_removed(&self, child: &DeviceId) {
        match self.ctx.topology.ha.remove_child(child) {
            Some(parent) => info!(%parent, "HA child removed"),
            None => debug!("device was not an HA child"),
        }
    }

    #[instrument(skip(self))]
    pub fn on_ha_parent_config_changed(&self, parent: &DeviceId) {
        if !self.ctx.topology.ha.is_parent(parent) {
            warn!("configuration change for a device that is not an HA parent");
            return;
        }
        self.submit_ha_sync(parent);
    }

    /// Reconciliation engine over the current HA topology.
    pub fn validation_engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(self.ctx.store.clone(), self.ctx.topology.ha.clone())
            .with_display_limit(self.display_limit)
    }

    /// Waits until every submitted job has finished.
    pub async fn wait_idle(&self) {
        self.ctx.coordinator.wait_idle().await;
    }

    fn gateway_ids(&self, elan: &str) -> Vec<DeviceId> {
        self.ctx
            .topology
            .gateways
            .devices_for_elan(elan)
            .into_iter()
            .map(|gateway| gateway.device)
            .collect()
    }

    fn submit_associate(&self, elan: &str, device: &DeviceId) {
        let job = AssociateJob::new(self.ctx.clone(), elan, device);
        let key = job.key();
        if self.ctx.deletions.cancel(&key) {
            info!(%device, elan, "pending logical switch deletion cancelled");
        }
        self.ctx.submit(key, Arc::new(job));
    }

    fn submit_disassociate(&self, elan: &str, device: &DeviceId, bindings: Vec<PortBinding>) {
        let job = DisassociateJob::new(self.ctx.clone(), elan, device, bindings);
        self.ctx.submit(job.key(), Arc::new(job));
    }

    fn submit_ha_sync(&self, parent: &DeviceId) {
        let job = HaConfigSyncJob::new(self.ctx.clone(), parent);
        self.ctx.submit(job.key(), Arc::new(job));
    }
}
