//! End-to-end job scenarios driven through the manager's event surface.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use sonic_l2gw_common::job_fn;
use sonic_l2gw_types::{DeviceId, DpnId, Plane};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use l2gwmgrd::entities::{GlobalAugmentation, HwvtepEntity, McastMac};
use l2gwmgrd::flow::{remote_bc_group_id, Action, Bucket, FlowDescriptor};
use l2gwmgrd::jobs::{BroadcastGroupJob, DmacJob, McastMacUpdateJob};

fn remote_mcast(h: &Harness, device: &DeviceId) -> Option<McastMac> {
    h.store
        .snapshot(device, Plane::Config)
        .global
        .and_then(|global| global.remote_mcast_macs.into_iter().find(|m| m.logical_switch.name == ELAN))
}

fn has_logical_switch(h: &Harness, device: &DeviceId) -> bool {
    h.store
        .snapshot(device, Plane::Config)
        .global
        .map_or(false, |global| global.logical_switches.iter().any(|ls| ls.name == ELAN))
}

fn vlan_binding_keys(h: &Harness, device: &DeviceId, switch: &str) -> Vec<String> {
    h.store
        .snapshot(&device.physical_switch(switch), Plane::Config)
        .physical_switch
        .map(|ps| ps.vlan_bindings.iter().map(|vb| vb.key()).collect())
        .unwrap_or_default()
}

fn learn_macs(h: &Harness, device: &DeviceId, tep: &str, macs: &[&str]) {
    h.store.insert_snapshot(
        Plane::Operational,
        global_snapshot(
            device,
            GlobalAugmentation {
                local_ucast_macs: macs.iter().map(|m| ucast(device, ELAN, m, tep)).collect(),
                ..Default::default()
            },
        ),
    );
}

/// `net1` on DPNs 1 and 2 with `gw1` attached and two hosts learned behind it.
async fn gateway_on_two_dpns() -> (Harness, DeviceId) {
    let h = Harness::new().with_elan(&[(1, "10.0.0.1"), (2, "10.0.0.2")]);
    let gw1 = gw("gw1");
    learn_macs(&h, &gw1, "192.168.0.1", &["00:00:00:00:00:0a", "00:00:00:00:00:0b"]);
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(1), "tap1");
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(2), "tap2");
    h.settle().await;
    (h, gw1)
}

fn teps(list: &[&str]) -> BTreeSet<std::net::IpAddr> {
    list.iter().map(|tep| ip(tep)).collect()
}

fn egress(src: u64, vni: u32, dst: &str) -> Bucket {
    Bucket {
        actions: vec![
            Action::SetTunnelId(u64::from(vni)),
            Action::SetTunnelDst(ip(dst)),
            Action::Output(format!("tun{}", src)),
        ],
    }
}

#[tokio::test]
async fn test_associate_creates_logical_switch_and_bindings() {
    let h = Harness::new().with_elan(&[]);
    let gw1 = gw("gw1");

    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager
        .on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100), binding("tor1", "eth2", 200)]);
    h.settle().await;

    let global = h.store.snapshot(&gw1, Plane::Config).global.unwrap();
    let ls = &global.logical_switches[0];
    assert_eq!(ls.name, ELAN);
    assert_eq!(ls.tunnel_key, Some(VNI));
    assert_eq!(vlan_binding_keys(&h, &gw1, "tor1"), vec!["eth1/100", "eth2/200"]);

    let bindings = h
        .store
        .snapshot(&gw1.physical_switch("tor1"), Plane::Config)
        .physical_switch
        .unwrap()
        .vlan_bindings;
    assert!(bindings.iter().all(|vb| vb.logical_switch.node == gw1));

    // Replaying the connection writes nothing new.
    let written = h.store.batches_written();
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.settle().await;
    assert_eq!(h.store.batches_written(), written);
}

#[tokio::test]
async fn test_dpn_added_extends_multicast_and_broadcast() {
    let h = Harness::new().with_elan(&[(1, "10.0.0.1"), (2, "10.0.0.2")]);
    let gw1 = gw("gw1");

    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(1), "tap1");
    h.settle().await;

    assert_eq!(remote_mcast(&h, &gw1).unwrap().teps(), teps(&["10.0.0.1"]));

    h.manager.on_dpn_interface_added(ELAN, DpnId::new(2), "tap2");
    h.settle().await;

    let mcast = remote_mcast(&h, &gw1).unwrap();
    assert_eq!(mcast.teps(), teps(&["10.0.0.1", "10.0.0.2"]));
    assert!(mcast.locator_set.iter().all(|locator| locator.node == gw1));

    let locators: BTreeSet<_> = h
        .store
        .snapshot(&gw1, Plane::Config)
        .global
        .unwrap()
        .locators
        .iter()
        .map(|locator| locator.tep)
        .collect();
    assert_eq!(locators, teps(&["10.0.0.1", "10.0.0.2"]));

    let group_id = remote_bc_group_id(ELAN_TAG);
    let d1 = h.flows.group(DpnId::new(1), group_id).unwrap();
    assert_eq!(d1.buckets, vec![egress(1, VNI, "10.0.0.2"), egress(1, VNI, "192.168.0.1")]);
    let d2 = h.flows.group(DpnId::new(2), group_id).unwrap();
    assert_eq!(d2.buckets, vec![egress(2, VNI, "10.0.0.1"), egress(2, VNI, "192.168.0.1")]);
    assert!(h.callbacks.failed.lock().is_empty());
}

#[tokio::test]
async fn test_gateways_flood_to_each_other() {
    let h = Harness::new().with_elan(&[]);
    let (gw1, gw2) = (gw("gw1"), gw("gw2"));

    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_device_connected(gateway("gw2", "192.168.0.2"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_connection_added(ELAN, &gw2, &[binding("tor2", "eth1", 100)]);
    h.settle().await;

    assert_eq!(remote_mcast(&h, &gw1).unwrap().teps(), teps(&["192.168.0.2"]));
    assert_eq!(remote_mcast(&h, &gw2).unwrap().teps(), teps(&["192.168.0.1"]));

    h.manager.on_tunnel_endpoint_removed(ip("192.168.0.2"));
    h.settle().await;
    assert_eq!(remote_mcast(&h, &gw1), None);
}

#[tokio::test]
async fn test_broadcast_and_multicast_jobs_are_idempotent() {
    let h = Harness::new().with_elan(&[(1, "10.0.0.1"), (2, "10.0.0.2")]);
    let gw1 = gw("gw1");
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(1), "tap1");
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(2), "tap2");
    h.settle().await;

    let operations = h.flows.operations();
    let batches = h.store.batches_written();

    let ctx = h.manager.context().clone();
    ctx.submit(ELAN.to_string(), Arc::new(BroadcastGroupJob::new(ctx.clone(), ELAN)));
    let mcast = McastMacUpdateJob::new(ctx.clone(), ELAN, &gw1);
    ctx.submit(mcast.key(), Arc::new(mcast));
    h.settle().await;

    assert_eq!(h.flows.operations(), operations);
    assert_eq!(h.store.batches_written(), batches);
}

#[tokio::test]
async fn test_dmac_flows_follow_dpn_membership() {
    let h = Harness::new().with_elan(&[(1, "10.0.0.1")]);
    let gw1 = gw("gw1");
    h.store.insert_snapshot(
        Plane::Operational,
        global_snapshot(
            &gw1,
            GlobalAugmentation {
                local_ucast_macs: vec![
                    ucast(&gw1, ELAN, "00:00:00:00:00:0a", "192.168.0.1"),
                    ucast(&gw1, "other", "00:00:00:00:00:0b", "192.168.0.1"),
                ],
                ..Default::default()
            },
        ),
    );

    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(1), "tap1");
    h.settle().await;

    let flows = h.flows.flows_on(DpnId::new(1));
    assert_eq!(flows.len(), 1);
    let expected = FlowDescriptor::dmac(
        DpnId::new(1),
        ELAN_TAG,
        mac("00:00:00:00:00:0a"),
        egress(1, VNI, "192.168.0.1").actions,
    );
    assert_eq!(flows[0], expected);

    h.manager.on_dpn_interface_removed(ELAN, DpnId::new(1), "tap1");
    h.settle().await;
    assert!(h.flows.flows_on(DpnId::new(1)).is_empty());
}

#[tokio::test]
async fn test_dmac_jobs_are_idempotent() {
    let (h, gw1) = gateway_on_two_dpns().await;
    assert_eq!(h.flows.flows_on(DpnId::new(1)).len(), 2);

    let ctx = h.manager.context().clone();
    let operations = h.flows.operations();
    let install = DmacJob::install(ctx.clone(), ELAN, DpnId::new(1), vec![gw1.clone()]);
    ctx.submit(install.key(), Arc::new(install));
    h.settle().await;
    assert_eq!(h.flows.operations(), operations);

    // Only the first uninstall has anything to remove.
    for _ in 0..2 {
        let uninstall = DmacJob::uninstall(ctx.clone(), ELAN, DpnId::new(1), vec![gw1.clone()]);
        ctx.submit(uninstall.key(), Arc::new(uninstall));
        h.settle().await;
        assert_eq!(h.flows.operations(), operations + 2);
    }
    assert!(h.flows.flows_on(DpnId::new(1)).is_empty());
    assert_eq!(h.flows.flows_on(DpnId::new(2)).len(), 2);
}

#[tokio::test]
async fn test_remove_elan_clears_dpn_forwarding_state() {
    let (h, gw1) = gateway_on_two_dpns().await;
    let group_id = remote_bc_group_id(ELAN_TAG);
    for dpn in [DpnId::new(1), DpnId::new(2)] {
        assert_eq!(h.flows.flows_on(dpn).len(), 2);
        assert!(h.flows.group(dpn, group_id).is_some());
    }

    h.manager.remove_elan(ELAN);
    h.settle().await;

    for dpn in [DpnId::new(1), DpnId::new(2)] {
        assert!(h.flows.flows_on(dpn).is_empty(), "flows left on {}", dpn);
        assert_eq!(h.flows.group(dpn, group_id), None);
    }
    assert!(vlan_binding_keys(&h, &gw1, "tor1").is_empty());
    assert!(h.manager.deletion_pending(ELAN, &gw1));
    assert!(h.callbacks.failed.lock().is_empty());
}

#[tokio::test]
async fn test_detached_gateway_stops_flooding_to_dpns_until_reattached() {
    let h = Harness::new().with_elan(&[(1, "10.0.0.1"), (2, "10.0.0.2")]);
    let (gw1, gw2) = (gw("gw1"), gw("gw2"));
    let port = binding("tor1", "eth1", 100);
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_device_connected(gateway("gw2", "192.168.0.2"));
    h.manager.on_connection_added(ELAN, &gw1, &[port.clone()]);
    h.manager.on_connection_added(ELAN, &gw2, &[binding("tor2", "eth1", 100)]);
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(1), "tap1");
    h.manager.on_dpn_interface_added(ELAN, DpnId::new(2), "tap2");
    h.settle().await;
    let everyone = teps(&["10.0.0.1", "10.0.0.2", "192.168.0.2"]);
    assert_eq!(remote_mcast(&h, &gw1).unwrap().teps(), everyone);

    h.manager.on_connection_removed(ELAN, &gw1, &[port.clone()]);
    h.settle().await;
    assert_eq!(remote_mcast(&h, &gw1).unwrap().teps(), teps(&["192.168.0.2"]));
    assert_eq!(remote_mcast(&h, &gw2).unwrap().teps(), teps(&["10.0.0.1", "10.0.0.2"]));

    h.manager.on_connection_added(ELAN, &gw1, &[port]);
    h.settle().await;
    assert_eq!(remote_mcast(&h, &gw1).unwrap().teps(), everyone);
    assert!(!h.manager.deletion_pending(ELAN, &gw1));
}

#[tokio::test(start_paused = true)]
async fn test_detach_schedules_logical_switch_deletion() {
    let h = Harness::new().with_elan(&[]);
    let (gw1, gw2) = (gw("gw1"), gw("gw2"));
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_device_connected(gateway("gw2", "192.168.0.2"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.manager.on_connection_added(ELAN, &gw2, &[binding("tor2", "eth1", 100)]);
    h.settle().await;
    assert!(remote_mcast(&h, &gw1).is_some());

    h.manager.on_connection_removed(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.settle().await;

    // Bindings go at once, the logical switch only after the delay.
    assert!(vlan_binding_keys(&h, &gw1, "tor1").is_empty());
    assert!(has_logical_switch(&h, &gw1));
    assert!(h.manager.deletion_pending(ELAN, &gw1));
    assert_eq!(remote_mcast(&h, &gw2), None);

    advance(Duration::from_secs(19)).await;
    h.settle().await;
    assert!(has_logical_switch(&h, &gw1));

    advance(Duration::from_secs(2)).await;
    h.settle().await;
    assert!(!has_logical_switch(&h, &gw1));
    assert_eq!(remote_mcast(&h, &gw1), None);
    assert!(!h.manager.deletion_pending(ELAN, &gw1));
}

#[tokio::test(start_paused = true)]
async fn test_reattach_cancels_pending_deletion() {
    let h = Harness::new().with_elan(&[]);
    let gw1 = gw("gw1");
    let port = binding("tor1", "eth1", 100);
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[port.clone()]);
    h.settle().await;

    h.manager.on_connection_removed(ELAN, &gw1, &[port.clone()]);
    h.settle().await;
    assert!(h.manager.deletion_pending(ELAN, &gw1));

    advance(Duration::from_secs(10)).await;
    h.manager.on_connection_added(ELAN, &gw1, &[port]);
    assert!(!h.manager.deletion_pending(ELAN, &gw1));

    advance(Duration::from_secs(30)).await;
    h.settle().await;
    assert!(has_logical_switch(&h, &gw1));
    assert_eq!(vlan_binding_keys(&h, &gw1, "tor1"), vec!["eth1/100"]);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_cancelled_after_timer_fired_writes_nothing() {
    let h = Harness::new().with_elan(&[]);
    let gw1 = gw("gw1");
    let key = "hwvtep://uuid/gw1:net1";
    let port = binding("tor1", "eth1", 100);
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[port.clone()]);
    h.settle().await;
    h.manager.on_connection_removed(ELAN, &gw1, &[port.clone()]);
    h.settle().await;

    // Tag the stored logical switch; a delete followed by a re-create drops the tag.
    let mut config = h.store.snapshot(&gw1, Plane::Config);
    config.global.as_mut().unwrap().logical_switches[0].uuid = Some("ls-1".to_string());
    h.store.insert_snapshot(Plane::Config, config);

    let release = Arc::new(Notify::new());
    let waiter = Arc::clone(&release);
    h.manager.coordinator().enqueue(
        key,
        job_fn("hold", move || {
            let waiter = Arc::clone(&waiter);
            async move {
                waiter.notified().await;
                Ok(())
            }
        }),
    );

    advance(Duration::from_secs(21)).await;
    assert_eq!(h.manager.coordinator().pending_jobs(key), 1);
    assert!(h.manager.deletion_pending(ELAN, &gw1));

    h.manager.on_connection_added(ELAN, &gw1, &[port]);
    assert!(!h.manager.deletion_pending(ELAN, &gw1));
    release.notify_one();
    h.settle().await;

    let global = h.store.snapshot(&gw1, Plane::Config).global.unwrap();
    assert_eq!(global.logical_switches.len(), 1);
    assert_eq!(global.logical_switches[0].uuid.as_deref(), Some("ls-1"));
    assert_eq!(vlan_binding_keys(&h, &gw1, "tor1"), vec!["eth1/100"]);
    assert!(h.callbacks.failed.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_associate_reports_once() {
    let h = Harness::new().with_elan(&[]);
    let gw1 = gw("gw1");
    h.store.fail_next_writes(3);

    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.settle().await;

    let failed = h.callbacks.failed.lock().clone();
    assert_eq!(
        failed,
        vec![(
            "hwvtep://uuid/gw1:net1".to_string(),
            "associate net1@hwvtep://uuid/gw1".to_string()
        )]
    );
    assert!(!has_logical_switch(&h, &gw1));
    assert_eq!(h.manager.coordinator().stats().retried, 2);
}

#[tokio::test]
async fn test_unknown_elan_jobs_do_nothing() {
    let h = Harness::new();
    let gw1 = gw("gw1");
    h.manager.on_device_connected(gateway("gw1", "192.168.0.1"));
    h.manager.on_connection_added(ELAN, &gw1, &[binding("tor1", "eth1", 100)]);
    h.settle().await;

    assert_eq!(h.store.batches_written(), 0);
    assert!(h.callbacks.failed.lock().is_empty());
}
