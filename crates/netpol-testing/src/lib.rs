//! Recording fakes for the collaborator traits.
//!
//! Tests drive the reconciler against these instead of the shell-backed
//! implementations and assert on the exact call sequences afterwards.
//! A fake can be armed with an error to simulate a transient OS
//! failure; while armed, every call records nothing and fails.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use netpol_common::{DeviceApi, FirewallUpdater, IpVersion, MacAddress, NetpolError, NetpolResult};

/// One recorded device-adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    /// `configure_interface_v4(iface)`
    ConfigureV4 {
        /// Interface name.
        iface: String,
    },
    /// `configure_interface_v6(iface, gateway)`
    ConfigureV6 {
        /// Interface name.
        iface: String,
        /// Gateway passed through, if any.
        gateway: Option<Ipv6Addr>,
    },
    /// `set_routes(version, nets, iface, mac, reset_neighbor)`
    SetRoutes {
        /// Address family.
        version: IpVersion,
        /// Desired address set.
        nets: BTreeSet<String>,
        /// Interface name.
        iface: String,
        /// MAC, absent on teardown.
        mac: Option<MacAddress>,
        /// Whether a neighbor-cache reset was requested.
        reset_neighbor: bool,
    },
}

/// Recording fake for [`DeviceApi`].
#[derive(Default)]
pub struct RecordingDeviceApi {
    calls: Mutex<Vec<DeviceCall>>,
    failure: Mutex<Option<NetpolError>>,
}

impl RecordingDeviceApi {
    /// Creates a fake wrapped for sharing with actors.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every call recorded so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns recorded calls and clears the log.
    pub fn take_calls(&self) -> Vec<DeviceCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Arms the fake: every call fails with a clone of `err` until
    /// [`RecordingDeviceApi::succeed`] is called.
    pub fn fail_with(&self, err: NetpolError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Disarms a previously armed failure.
    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    fn record(&self, call: DeviceCall) -> NetpolResult<()> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl DeviceApi for RecordingDeviceApi {
    async fn configure_interface_v4(&self, iface: &str) -> NetpolResult<()> {
        self.record(DeviceCall::ConfigureV4 {
            iface: iface.to_string(),
        })
    }

    async fn configure_interface_v6(
        &self,
        iface: &str,
        gateway: Option<Ipv6Addr>,
    ) -> NetpolResult<()> {
        self.record(DeviceCall::ConfigureV6 {
            iface: iface.to_string(),
            gateway,
        })
    }

    async fn set_routes(
        &self,
        version: IpVersion,
        nets: &BTreeSet<String>,
        iface: &str,
        mac: Option<MacAddress>,
        reset_neighbor: bool,
    ) -> NetpolResult<()> {
        self.record(DeviceCall::SetRoutes {
            version,
            nets: nets.clone(),
            iface: iface.to_string(),
            mac,
            reset_neighbor,
        })
    }
}

/// One recorded firewall-updater invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallCall {
    /// `rewrite_chains(updates, dependencies)`
    Rewrite {
        /// Chain name to full rule list.
        updates: BTreeMap<String, Vec<String>>,
        /// Chain name to referenced chains.
        dependencies: BTreeMap<String, BTreeSet<String>>,
    },
    /// `delete_chains(chains)`
    Delete {
        /// Chains to remove.
        chains: BTreeSet<String>,
    },
}

/// Recording fake for [`FirewallUpdater`].
#[derive(Default)]
pub struct RecordingFirewall {
    calls: Mutex<Vec<FirewallCall>>,
    failure: Mutex<Option<NetpolError>>,
}

impl RecordingFirewall {
    /// Creates a fake wrapped for sharing with actors.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns every call recorded so far.
    pub fn calls(&self) -> Vec<FirewallCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns recorded calls and clears the log.
    pub fn take_calls(&self) -> Vec<FirewallCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Arms the fake: every call fails with a clone of `err` until
    /// [`RecordingFirewall::succeed`] is called.
    pub fn fail_with(&self, err: NetpolError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    /// Disarms a previously armed failure.
    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    fn record(&self, call: FirewallCall) -> NetpolResult<()> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl FirewallUpdater for RecordingFirewall {
    async fn rewrite_chains(
        &self,
        updates: BTreeMap<String, Vec<String>>,
        dependencies: BTreeMap<String, BTreeSet<String>>,
    ) -> NetpolResult<()> {
        self.record(FirewallCall::Rewrite {
            updates,
            dependencies,
        })
    }

    async fn delete_chains(&self, chains: BTreeSet<String>) -> NetpolResult<()> {
        self.record(FirewallCall::Delete { chains })
    }
}
