//! Shell-backed implementation of the device adapter.
//!
//! Commands are assembled by pure helpers (tested without touching the
//! OS) and executed through the quoting-safe shell layer. Workload
//! interfaces are wholly owned by this daemon, so route programming
//! can simply flush the device's routes and re-add the desired set.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use netpol_common::shell::{self, shellquote};
use netpol_common::{DeviceApi, IpVersion, MacAddress, NetpolResult};

use crate::config::EnforcerConfig;

/// Device adapter that drives `ip` and `sysctl`.
pub struct ShellDeviceApi {
    config: Arc<EnforcerConfig>,
}

impl ShellDeviceApi {
    /// Creates the adapter.
    pub fn new(config: Arc<EnforcerConfig>) -> Self {
        Self { config }
    }

    async fn run_all(&self, commands: Vec<String>) -> NetpolResult<()> {
        for command in commands {
            shell::exec_or_throw(&command).await?;
        }
        Ok(())
    }
}

fn configure_v4_commands(config: &EnforcerConfig, iface: &str) -> Vec<String> {
    vec![
        format!(
            "{} -w {}",
            config.sysctl_cmd,
            shellquote(&format!("net.ipv4.conf.{}.route_localnet=1", iface))
        ),
        format!(
            "{} -w {}",
            config.sysctl_cmd,
            shellquote(&format!("net.ipv4.conf.{}.proxy_arp=1", iface))
        ),
        format!("{} link set {} up", config.ip_cmd, shellquote(iface)),
    ]
}

fn configure_v6_commands(
    config: &EnforcerConfig,
    iface: &str,
    gateway: Option<Ipv6Addr>,
) -> Vec<String> {
    let mut commands = vec![
        format!(
            "{} -w {}",
            config.sysctl_cmd,
            shellquote(&format!("net.ipv6.conf.{}.disable_ipv6=0", iface))
        ),
        format!(
            "{} -w {}",
            config.sysctl_cmd,
            shellquote(&format!("net.ipv6.conf.{}.proxy_ndp=1", iface))
        ),
        format!("{} link set {} up", config.ip_cmd, shellquote(iface)),
    ];
    if let Some(gateway) = gateway {
        commands.push(format!(
            "{} -6 route replace {}/128 dev {}",
            config.ip_cmd,
            gateway,
            shellquote(iface)
        ));
    }
    commands
}

fn set_routes_commands(
    config: &EnforcerConfig,
    version: IpVersion,
    nets: &BTreeSet<String>,
    iface: &str,
    mac: Option<MacAddress>,
    reset_neighbor: bool,
) -> Vec<String> {
    let mut commands = Vec::new();
    if reset_neighbor {
        commands.push(format!(
            "{} neigh flush dev {}",
            config.ip_cmd,
            shellquote(iface)
        ));
    }
    commands.push(format!(
        "{} {} route flush dev {}",
        config.ip_cmd,
        version.family_flag(),
        shellquote(iface)
    ));
    for net in nets {
        let dst = if net.contains('/') {
            net.clone()
        } else {
            format!("{}/{}", net, version.host_prefix_len())
        };
        commands.push(format!(
            "{} {} route replace {} dev {}",
            config.ip_cmd,
            version.family_flag(),
            shellquote(&dst),
            shellquote(iface)
        ));
        if let Some(mac) = mac {
            if version == IpVersion::V4 {
                // Static neighbor entry so traffic to the workload does
                // not depend on it answering ARP.
                let addr = net.split('/').next().unwrap_or(net);
                commands.push(format!(
                    "{} neigh replace {} lladdr {} dev {} nud permanent",
                    config.ip_cmd,
                    shellquote(addr),
                    mac,
                    shellquote(iface)
                ));
            }
        }
    }
    commands
}

#[async_trait]
impl DeviceApi for ShellDeviceApi {
    async fn configure_interface_v4(&self, iface: &str) -> NetpolResult<()> {
        debug!(iface = %iface, "configuring interface for IPv4");
        self.run_all(configure_v4_commands(&self.config, iface)).await
    }

    async fn configure_interface_v6(
        &self,
        iface: &str,
        gateway: Option<Ipv6Addr>,
    ) -> NetpolResult<()> {
        debug!(iface = %iface, ?gateway, "configuring interface for IPv6");
        self.run_all(configure_v6_commands(&self.config, iface, gateway))
            .await
    }

    async fn set_routes(
        &self,
        version: IpVersion,
        nets: &BTreeSet<String>,
        iface: &str,
        mac: Option<MacAddress>,
        reset_neighbor: bool,
    ) -> NetpolResult<()> {
        debug!(
            iface = %iface,
            version = %version,
            routes = nets.len(),
            reset_neighbor,
            "programming routes"
        );
        self.run_all(set_routes_commands(
            &self.config,
            version,
            nets,
            iface,
            mac,
            reset_neighbor,
        ))
        .await
    }
}
