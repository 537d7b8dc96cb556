//! l2gwmgrd - L2 gateway manager daemon
//!
//! Keeps ELAN state consistent across forwarding switches (DPNs) and hardware
//! VTEP gateways:
//!
//! - [`L2GwManager`] turns topology events into jobs on the
//!   [`JobCoordinator`](sonic_l2gw_common::JobCoordinator)
//! - [`jobs`] holds the state-mutation jobs (flood groups, multicast entries,
//!   DMAC flows, associate/disassociate, HA fan-out)
//! - [`ha`] holds the HA topology index, the entity extractors and the
//!   reconciliation engine that reports HA and config/operational drift
//!
//! The data store and the flow tables are reached through the [`DataStore`],
//! [`FlowProgrammer`] and [`TunnelResolver`] traits.

pub mod cache;
pub mod config;
pub mod entities;
pub mod error;
pub mod flow;
pub mod ha;
pub mod jobs;
pub mod manager;
pub mod store;

pub use cache::{
    ElanDpnCache, ElanInstance, ElanInstanceCache, L2GatewayCache, L2GatewayDevice, PortBinding,
    TopologyState,
};
pub use config::{L2gwConfig, DEFAULT_CONFIG_PATH};
pub use entities::{DeviceSnapshot, EntityItem, EntityKind, HwvtepEntity};
pub use error::{L2gwError, Result};
pub use flow::{
    FlowDescriptor, FlowProgrammer, GroupDescriptor, MemoryFlowProgrammer, StaticTunnelResolver,
    TunnelEndpoint, TunnelResolver,
};
pub use ha::{HaTopologyIndex, ReconciliationEngine, ReconciliationReport};
pub use manager::{Collaborators, L2GwManager};
pub use store::{DataStore, MemoryDataStore, Mutation, MutationBatch, StoreDump};
