//! HA parent/child handling: topology index, entity extractors and the
//! reconciliation engine built on them.

pub mod merge;
pub mod reconcile;
pub mod topology;

pub use merge::{
    default_commands, diff_items, EntityComparator, EntityDiff, ItemDiff, LocalMcastMacCommand,
    LocalUcastMacCommand, LogicalSwitchCommand, MergeCommand, PhysicalLocatorCommand,
    RemoteMcastMacCommand, RemoteUcastMacCommand, Rescope, VlanBindingCommand,
};
pub use reconcile::{format_keys, ReconciliationEngine, ReconciliationReport, DEFAULT_DISPLAY_LIMIT};
pub use topology::HaTopologyIndex;
