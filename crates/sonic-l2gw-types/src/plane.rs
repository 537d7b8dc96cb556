//! State planes of the data store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which view of an entity is being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    /// Desired state, written by this system.
    Config,
    /// Observed state, reported by the device.
    Operational,
}

impl Plane {
    /// Returns the plane name as used in reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Plane::Config => "config",
            Plane::Operational => "operational",
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
