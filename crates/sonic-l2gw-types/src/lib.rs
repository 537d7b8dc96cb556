//! Shared types for L2 gateway (ELAN/HWVTEP) state management.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`HwvtepMac`]: MAC column of HWVTEP multicast/unicast tables (may be `unknown-dst`)
//! - [`DeviceId`]: HWVTEP node identifiers, global or physical-switch scoped
//! - [`DpnId`]: forwarding switch (datapath) identifiers
//! - [`Plane`]: desired (configuration) vs observed (operational) state

mod device;
mod mac;
mod plane;

pub use device::{DeviceId, DpnId, PHYSICAL_SWITCH_SEGMENT};
pub use mac::{HwvtepMac, MacAddress};
pub use plane::Plane;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid DPN id: {0}")]
    InvalidDpnId(String),
}
