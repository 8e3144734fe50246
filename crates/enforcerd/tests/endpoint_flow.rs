//! End-to-end reconciliation flow against recording fakes: manager,
//! per-endpoint reconcilers and dispatch chains wired together the way
//! the daemon wires them.

use std::collections::BTreeSet;
use std::sync::Arc;

use enforcerd::config::EnforcerConfig;
use enforcerd::dispatch::{DispatchChains, DispatchMsg};
use enforcerd::endpoint_mgr::EndpointManager;
use netpol_actor::ActorHandle;
use netpol_common::{DeviceApi, EndpointData, EndpointId, FirewallUpdater, IpVersion};
use netpol_testing::{DeviceCall, FirewallCall, RecordingDeviceApi, RecordingFirewall};

struct Harness {
    manager: EndpointManager,
    devices: Arc<RecordingDeviceApi>,
    firewall: Arc<RecordingFirewall>,
    dispatch: ActorHandle<DispatchChains>,
}

fn harness(version: IpVersion) -> Harness {
    let config = EnforcerConfig::default();
    let devices = RecordingDeviceApi::shared();
    let firewall = RecordingFirewall::shared();
    let dispatch = netpol_actor::spawn(DispatchChains::new(
        version,
        &config,
        Arc::clone(&firewall) as Arc<dyn FirewallUpdater>,
    ));
    let manager = EndpointManager::new(
        version,
        config,
        Arc::clone(&devices) as Arc<dyn DeviceApi>,
        Arc::clone(&firewall) as Arc<dyn FirewallUpdater>,
        dispatch.clone(),
    );
    Harness {
        manager,
        devices,
        firewall,
        dispatch,
    }
}

/// Waits for the dispatch actor to drain everything queued so far.
async fn flush_dispatch(harness: &Harness) {
    harness
        .dispatch
        .call(DispatchMsg::EndpointRemoved("flush-sync".to_string()))
        .await
        .unwrap();
}

fn endpoint_id(endpoint: &str) -> EndpointId {
    EndpointId::new("host1", "orch", "wl1", endpoint)
}

fn endpoint_data(iface: &str, mac: &str, net: &str, profiles: &[&str]) -> EndpointData {
    EndpointData {
        name: iface.to_string(),
        mac: mac.parse().unwrap(),
        ipv4_nets: [net.to_string()].into(),
        ipv6_nets: BTreeSet::new(),
        ipv6_gateway: None,
        profile_ids: profiles.iter().map(|p| p.to_string()).collect(),
    }
}

#[tokio::test]
async fn endpoint_lifecycle_programs_and_tears_down_everything() {
    let mut h = harness(IpVersion::V4);
    let id = endpoint_id("e1");
    let data = endpoint_data("tapA1", "aa:22:33:44:55:66", "10.0.0.5", &["prof-1"]);

    // Creation: interface configured, routes set with a neighbor
    // reset, chain pair written, dispatch updated.
    h.manager.on_endpoint_update(&id, Some(data.clone())).await.unwrap();
    flush_dispatch(&h).await;

    assert_eq!(
        h.devices.take_calls(),
        vec![
            DeviceCall::ConfigureV4 {
                iface: "tapA1".to_string()
            },
            DeviceCall::SetRoutes {
                version: IpVersion::V4,
                nets: ["10.0.0.5".to_string()].into(),
                iface: "tapA1".to_string(),
                mac: Some("aa:22:33:44:55:66".parse().unwrap()),
                reset_neighbor: true,
            },
        ]
    );

    let calls = h.firewall.take_calls();
    let endpoint_rewrite = calls.iter().any(|c| match c {
        FirewallCall::Rewrite { updates, dependencies } => {
            updates.contains_key("npol-from-A1")
                && updates.contains_key("npol-to-A1")
                && dependencies["npol-from-A1"].contains("npol-p-prof-1-o")
        }
        FirewallCall::Delete { .. } => false,
    });
    let dispatch_rewrite = calls.iter().any(|c| match c {
        FirewallCall::Rewrite { updates, .. } => updates
            .get("npol-FROM-ENDPOINT")
            .is_some_and(|rules| rules.iter().any(|r| r.contains("--goto npol-from-A1"))),
        FirewallCall::Delete { .. } => false,
    });
    assert!(endpoint_rewrite, "endpoint chain pair was not written");
    assert!(dispatch_rewrite, "dispatch chains were not updated");

    // A link bounce replays identical device calls.
    h.manager.on_endpoint_update(&id, Some(data.clone())).await.unwrap();
    let steady = h.devices.take_calls();
    h.manager.on_interface_update(&id).await.unwrap();
    assert_eq!(h.devices.take_calls(), steady);

    // Deletion: one route withdrawal, chains deleted, dispatch updated,
    // reconciler retired.
    h.manager.on_endpoint_update(&id, None).await.unwrap();
    flush_dispatch(&h).await;

    assert_eq!(
        h.devices.take_calls(),
        vec![DeviceCall::SetRoutes {
            version: IpVersion::V4,
            nets: BTreeSet::new(),
            iface: "tapA1".to_string(),
            mac: None,
            reset_neighbor: false,
        }]
    );
    let calls = h.firewall.take_calls();
    let chains_deleted = calls.iter().any(|c| match c {
        FirewallCall::Delete { chains } => {
            chains.contains("npol-from-A1") && chains.contains("npol-to-A1")
        }
        FirewallCall::Rewrite { .. } => false,
    });
    let dispatch_emptied = calls.iter().any(|c| match c {
        FirewallCall::Rewrite { updates, .. } => updates
            .get("npol-FROM-ENDPOINT")
            .is_some_and(|rules| rules.iter().all(|r| !r.contains("npol-from-A1"))),
        FirewallCall::Delete { .. } => false,
    });
    assert!(chains_deleted, "endpoint chains were not deleted");
    assert!(dispatch_emptied, "dispatch chains still reference the endpoint");
    assert!(h.manager.is_empty());
}

#[tokio::test]
async fn two_endpoints_reconcile_independently() {
    let mut h = harness(IpVersion::V4);
    let id1 = endpoint_id("e1");
    let id2 = endpoint_id("e2");

    h.manager
        .on_endpoint_update(
            &id1,
            Some(endpoint_data("tapB1", "aa:22:33:44:55:01", "10.0.0.1", &[])),
        )
        .await
        .unwrap();
    h.manager
        .on_endpoint_update(
            &id2,
            Some(endpoint_data("tapB2", "aa:22:33:44:55:02", "10.0.0.2", &[])),
        )
        .await
        .unwrap();
    flush_dispatch(&h).await;
    assert_eq!(h.manager.len(), 2);

    // Both interfaces share the "B" suffix prefix, so dispatch moved
    // them into leaf chains.
    let leaf_dispatch = h.firewall.calls().iter().any(|c| match c {
        FirewallCall::Rewrite { updates, .. } => updates.contains_key("npol-FROM-LEAF-B"),
        FirewallCall::Delete { .. } => false,
    });
    assert!(leaf_dispatch, "expected leaf dispatch chains for shared prefix");

    // A failure on one endpoint leaves the other reconciler intact.
    h.devices
        .fail_with(netpol_common::NetpolError::shell_exec("/sbin/ip", "transient"));
    let err = h
        .manager
        .on_endpoint_update(
            &id1,
            Some(endpoint_data("tapB1", "aa:22:33:44:55:99", "10.0.0.1", &[])),
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    h.devices.succeed();

    h.manager.on_interface_update(&id2).await.unwrap();
    match h.devices.take_calls().last() {
        Some(DeviceCall::SetRoutes { iface, mac, .. }) => {
            assert_eq!(iface, "tapB2");
            assert_eq!(*mac, Some("aa:22:33:44:55:02".parse().unwrap()));
        }
        other => panic!("unexpected call: {other:?}"),
    }
}
