//! Reconciliation engine over the in-memory data store.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use sonic_l2gw_types::{DeviceId, Plane};
use std::sync::Arc;

use l2gwmgrd::entities::{
    GlobalAugmentation, LogicalSwitch, LogicalSwitchRef, PhysicalSwitchAugmentation, VlanBinding,
};
use l2gwmgrd::store::HaGroup;
use l2gwmgrd::{
    DeviceSnapshot, HaTopologyIndex, MemoryDataStore, ReconciliationEngine, StoreDump,
};

fn logical_switches(device: &DeviceId, names: &[&str]) -> DeviceSnapshot {
    global_snapshot(
        device,
        GlobalAugmentation {
            logical_switches: names.iter().map(|name| LogicalSwitch::new(*name, VNI)).collect(),
            ..Default::default()
        },
    )
}

fn engine(store: Arc<MemoryDataStore>, ha: Arc<HaTopologyIndex>) -> ReconciliationEngine {
    ReconciliationEngine::new(store, ha)
}

#[tokio::test]
async fn test_identical_planes_are_clean() {
    let store = Arc::new(MemoryDataStore::new());
    let gw1 = gw("gw1");
    let snapshot = global_snapshot(
        &gw1,
        GlobalAugmentation {
            logical_switches: vec![LogicalSwitch::new(ELAN, VNI)],
            remote_ucast_macs: vec![ucast(&gw1, ELAN, "00:00:00:00:00:01", "10.0.0.1")],
            remote_mcast_macs: vec![unknown_dst(&gw1, ELAN, &["10.0.0.1", "10.0.0.2"])],
            ..Default::default()
        },
    );
    store.insert_snapshot(Plane::Config, snapshot.clone());
    store.insert_snapshot(Plane::Operational, snapshot);

    let report = engine(store, Arc::new(HaTopologyIndex::new()))
        .run(&[gw1])
        .await;
    assert!(report.is_clean(), "{}", report);
    assert_eq!(report.comparisons, 1);
    assert!(report.lines.is_empty());
}

#[tokio::test]
async fn test_config_vs_operational_reports_both_directions() {
    let store = Arc::new(MemoryDataStore::new());
    let gw1 = gw("gw1");
    store.insert_snapshot(Plane::Config, logical_switches(&gw1, &["net1", "net2"]));
    store.insert_snapshot(Plane::Operational, logical_switches(&gw1, &["net1", "net3"]));

    let report = engine(store, Arc::new(HaTopologyIndex::new()))
        .validate_config_vs_operational(&[gw1])
        .await;
    assert_eq!(report.discrepancies, 2);
    assert_eq!(
        report.lines,
        vec![
            "logical_switch: 1 logical switches present in config but missing or mismatched in \
             operational state of hwvtep://uuid/gw1: net2"
                .to_string(),
            "logical_switch: 1 logical switches present operationally without configuration on \
             hwvtep://uuid/gw1: net3"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unreadable_device_does_not_stop_the_run() {
    let store = Arc::new(MemoryDataStore::new());
    let (gw1, gw2) = (gw("gw1"), gw("gw2"));
    store.insert_snapshot(Plane::Config, logical_switches(&gw2, &["net1"]));
    store.set_unreachable(&gw1, true);

    let report = engine(store, Arc::new(HaTopologyIndex::new()))
        .validate_config_vs_operational(&[gw1, gw2])
        .await;
    assert_eq!(report.read_failures, 1);
    assert_eq!(report.comparisons, 1);
    assert_eq!(report.discrepancies, 1);
    assert!(report.lines[0].starts_with("hwvtep://uuid/gw1: failed to read config plane"));
    assert!(report.lines[1].ends_with("hwvtep://uuid/gw2: net1"));
}

#[tokio::test]
async fn test_long_key_lists_are_truncated() {
    let store = Arc::new(MemoryDataStore::new());
    let gw1 = gw("gw1");
    let names: Vec<String> = (0..12).map(|i| format!("net{:02}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    store.insert_snapshot(Plane::Config, logical_switches(&gw1, &refs));

    let report = engine(store.clone(), Arc::new(HaTopologyIndex::new()))
        .validate_config_vs_operational(&[gw1.clone()])
        .await;
    assert!(report.lines[0].ends_with("net08, net09, ... (2 more)"));

    let report = engine(store, Arc::new(HaTopologyIndex::new()))
        .with_display_limit(2)
        .validate_config_vs_operational(&[gw1])
        .await;
    assert!(report.lines[0].ends_with(": net00, net01, ... (10 more)"));
}

#[tokio::test]
async fn test_ha_child_compared_in_parent_scope() {
    let store = Arc::new(MemoryDataStore::new());
    let ha = Arc::new(HaTopologyIndex::new());
    let (parent, gw1, gw2) = (gw("ha"), gw("gw1"), gw("gw2"));
    ha.add_child(&parent, &gw1).unwrap();
    ha.add_child(&parent, &gw2).unwrap();

    let state = |node: &DeviceId| {
        global_snapshot(
            node,
            GlobalAugmentation {
                logical_switches: vec![LogicalSwitch::new(ELAN, VNI)],
                remote_ucast_macs: vec![ucast(node, ELAN, "00:00:00:00:00:01", "10.0.0.1")],
                ..Default::default()
            },
        )
    };
    store.insert_snapshot(Plane::Config, state(&parent));
    store.insert_snapshot(Plane::Config, state(&gw1));
    store.insert_snapshot(Plane::Config, logical_switches(&gw2, &[ELAN]));

    let report = engine(store, ha).validate_ha(Plane::Config).await;
    assert_eq!(report.comparisons, 2);
    assert_eq!(
        report.lines,
        vec!["remote_ucast_mac: 1 remote unicast MACs present in parent hwvtep://uuid/ha but missing \
              or mismatched in child hwvtep://uuid/gw2 (config plane): 00:00:00:00:00:01/net1"
            .to_string()]
    );
}

#[tokio::test]
async fn test_ha_physical_switches_are_compared() {
    let store = Arc::new(MemoryDataStore::new());
    let ha = Arc::new(HaTopologyIndex::new());
    let (parent, child) = (gw("ha"), gw("gw1"));
    ha.add_child(&parent, &child).unwrap();

    let mut parent_global = GlobalAugmentation::default();
    parent_global.switches = vec!["tor1".to_string()];
    store.insert_snapshot(Plane::Operational, global_snapshot(&parent, parent_global));
    store.insert_snapshot(
        Plane::Operational,
        DeviceSnapshot {
            device: parent.physical_switch("tor1"),
            global: None,
            physical_switch: Some(PhysicalSwitchAugmentation {
                name: "tor1".to_string(),
                tunnel_ips: vec![],
                vlan_bindings: vec![VlanBinding {
                    port: "eth1".to_string(),
                    vlan: 100,
                    logical_switch: LogicalSwitchRef::new(&parent, ELAN),
                }],
            }),
        },
    );

    let report = engine(store, ha).validate_ha(Plane::Operational).await;
    assert_eq!(report.comparisons, 2);
    assert_eq!(report.discrepancies, 1);
    assert!(report.lines[0].starts_with("vlan_binding: 1 VLAN bindings present in parent hwvtep://uuid/ha/physicalswitch/tor1"));
    assert!(report.lines[0].ends_with(": eth1/100"));
}

#[tokio::test]
async fn test_dump_file_round_trip() {
    let gw1 = gw("gw1");
    let dump = StoreDump {
        config: vec![logical_switches(&gw1, &[ELAN])],
        operational: vec![logical_switches(&gw1, &[ELAN])],
        ha: vec![HaGroup {
            parent: gw("ha"),
            children: vec![gw1.clone()],
        }],
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.json");
    std::fs::write(&path, serde_json::to_string_pretty(&dump).unwrap()).unwrap();

    let loaded = StoreDump::load(&path).unwrap();
    assert_eq!(loaded, dump);
    assert_eq!(loaded.devices().into_iter().collect::<Vec<_>>(), vec![gw1.clone()]);

    let store = Arc::new(MemoryDataStore::from_dump(&loaded));
    let report = engine(store, Arc::new(HaTopologyIndex::new()))
        .run(&[gw1])
        .await;
    assert!(report.is_clean());

    let report_path = dir.path().join("report.txt");
    report.write_to(&report_path).unwrap();
    let written = std::fs::read_to_string(&report_path).unwrap();
    assert!(written.starts_with("Validation report generated at "));
    assert!(written.contains("1 comparisons, 0 discrepancies, 0 read failures"));
}

#[tokio::test]
async fn test_manager_engine_sees_synced_children() {
    let h = Harness::new();
    let (parent, child) = (gw("ha"), gw("gw1"));

    let mut parent_global = GlobalAugmentation {
        logical_switches: vec![LogicalSwitch::new(ELAN, VNI)],
        remote_ucast_macs: vec![ucast(&parent, ELAN, "00:00:00:00:00:01", "10.0.0.1")],
        remote_mcast_macs: vec![unknown_dst(&parent, ELAN, &["10.0.0.1"])],
        ..Default::default()
    };
    parent_global.switches = vec!["tor1".to_string()];
    h.store.insert_snapshot(Plane::Config, global_snapshot(&parent, parent_global));
    h.store.insert_snapshot(
        Plane::Config,
        DeviceSnapshot {
            device: parent.physical_switch("tor1"),
            global: None,
            physical_switch: Some(PhysicalSwitchAugmentation {
                name: "tor1".to_string(),
                tunnel_ips: vec![],
                vlan_bindings: vec![VlanBinding {
                    port: "eth1".to_string(),
                    vlan: 100,
                    logical_switch: LogicalSwitchRef::new(&parent, ELAN),
                }],
            }),
        },
    );
    h.store
        .insert_snapshot(Plane::Config, logical_switches(&child, &[ELAN, "stale"]));

    let before = h.manager.validation_engine().validate_ha(Plane::Config).await;
    assert!(before.is_clean(), "no HA group yet: {}", before);

    h.manager.on_ha_child_added(&parent, &child).unwrap();
    h.settle().await;

    let child_config = h.store.snapshot(&child, Plane::Config).global.unwrap();
    let names: Vec<&str> = child_config
        .logical_switches
        .iter()
        .map(|ls| ls.name.as_str())
        .collect();
    assert_eq!(names, vec![ELAN]);
    let remote = &child_config.remote_ucast_macs[0];
    assert_eq!(remote.logical_switch.node, child);
    assert_eq!(remote.locator.node, child);

    let child_switch = h
        .store
        .snapshot(&child.physical_switch("tor1"), Plane::Config)
        .physical_switch
        .unwrap();
    assert_eq!(child_switch.vlan_bindings[0].logical_switch.node, child);

    let after = h.manager.validation_engine().validate_ha(Plane::Config).await;
    assert!(after.is_clean(), "{}", after);
    assert_eq!(after.comparisons, 2);

    // A second sync finds nothing to do.
    let batches = h.store.batches_written();
    h.manager.on_ha_parent_config_changed(&parent);
    h.settle().await;
    assert_eq!(h.store.batches_written(), batches);
}
