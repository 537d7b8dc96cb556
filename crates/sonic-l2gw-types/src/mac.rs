//! MAC address types for HWVTEP unicast and multicast tables.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// # Examples
///
/// ```
/// use sonic_l2gw_types::MacAddress;
///
/// let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
/// assert_eq!(mac.to_string(), "00:11:22:33:44:55");
///
/// // OVSDB rows sometimes carry hyphen-separated, upper-case values
/// let mac2: MacAddress = "00-11-22-33-44-55".parse().unwrap();
/// assert_eq!(mac, mac2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast MAC address (FF:FF:FF:FF:FF:FF).
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if the group bit of the first octet is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

/// MAC column of an HWVTEP MAC table.
///
/// Multicast tables use the literal `unknown-dst` to describe the flood entry
/// for BUM traffic; every other row carries a concrete address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HwvtepMac {
    /// Flood entry matching every unknown destination.
    UnknownDst,
    /// A concrete MAC address.
    Address(MacAddress),
}

impl HwvtepMac {
    /// Literal used by HWVTEP for the flood entry.
    pub const UNKNOWN_DST: &'static str = "unknown-dst";

    /// Returns the concrete address, if any.
    pub const fn address(&self) -> Option<MacAddress> {
        match self {
            HwvtepMac::UnknownDst => None,
            HwvtepMac::Address(mac) => Some(*mac),
        }
    }
}

impl fmt::Display for HwvtepMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HwvtepMac::UnknownDst => f.write_str(Self::UNKNOWN_DST),
            HwvtepMac::Address(mac) => mac.fmt(f),
        }
    }
}

impl FromStr for HwvtepMac {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(Self::UNKNOWN_DST) {
            Ok(HwvtepMac::UnknownDst)
        } else {
            s.parse().map(HwvtepMac::Address)
        }
    }
}

impl TryFrom<String> for HwvtepMac {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HwvtepMac> for String {
    fn from(mac: HwvtepMac) -> String {
        mac.to_string()
    }
}

impl From<MacAddress> for HwvtepMac {
    fn from(mac: MacAddress) -> Self {
        HwvtepMac::Address(mac)
    }
}
