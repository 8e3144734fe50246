//! Collaborator traits the reconciler is written against.
//!
//! Production implementations shell out to the OS; tests substitute
//! recording fakes. Both collaborators are shared across every
//! per-endpoint actor, so implementations must be `Send + Sync` and
//! must tolerate being called from many actors concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

use async_trait::async_trait;

use crate::error::NetpolResult;
use crate::types::{IpVersion, MacAddress};

/// Interface, route and neighbor manipulation on the host.
///
/// Calls are idempotent at the OS level but expensive; callers avoid
/// redundant invocation rather than relying on the OS to no-op.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Prepares an interface for IPv4 workload traffic and brings the
    /// link up.
    async fn configure_interface_v4(&self, iface: &str) -> NetpolResult<()>;

    /// Prepares an interface for IPv6 workload traffic, bringing the
    /// link up and installing the gateway route when one is given.
    async fn configure_interface_v6(
        &self,
        iface: &str,
        gateway: Option<Ipv6Addr>,
    ) -> NetpolResult<()>;

    /// Replaces the host routes for `iface` with routes to `nets`.
    ///
    /// `mac` is `Some` when (re)configuring and `None` on teardown.
    /// `reset_neighbor` forces re-resolution of the neighbor cache for
    /// the interface first; callers only set it for IPv4.
    async fn set_routes(
        &self,
        version: IpVersion,
        nets: &BTreeSet<String>,
        iface: &str,
        mac: Option<MacAddress>,
        reset_neighbor: bool,
    ) -> NetpolResult<()>;
}

/// Narrow interface to the firewall-table transaction mechanism.
///
/// `updates` maps chain names to their complete new rule lists;
/// `dependencies` maps each written chain to the chains its rules
/// reference, letting the implementation make sure referenced chains
/// exist before rules pointing at them land.
#[async_trait]
pub trait FirewallUpdater: Send + Sync {
    /// Atomically rewrites the given chains.
    async fn rewrite_chains(
        &self,
        updates: BTreeMap<String, Vec<String>>,
        dependencies: BTreeMap<String, BTreeSet<String>>,
    ) -> NetpolResult<()>;

    /// Flushes and deletes the given chains.
    async fn delete_chains(&self, chains: BTreeSet<String>) -> NetpolResult<()>;
}
