//! Enforcement daemon entry point.

use std::collections::BTreeSet;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use enforcerd::config::EnforcerConfig;
use enforcerd::devices::ShellDeviceApi;
use enforcerd::dispatch::{DispatchChains, DispatchMsg};
use enforcerd::endpoint_mgr::EndpointManager;
use enforcerd::firewall::IptablesRestoreUpdater;
use netpol_common::{DeviceApi, FirewallUpdater, IpVersion};

#[derive(Parser, Debug)]
#[command(name = "enforcerd", about = "Per-host network-policy enforcement daemon")]
struct Args {
    /// Interface-name prefix for workload endpoints.
    #[arg(long)]
    iface_prefix: Option<String>,

    /// Hostname override for endpoint identities.
    #[arg(long)]
    hostname: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    let mut config = EnforcerConfig::from_env();
    if let Some(prefix) = args.iface_prefix {
        config.iface_prefix = prefix;
    }
    if let Some(hostname) = args.hostname {
        config.hostname = hostname;
    }
    config.validate()?;
    let config = Arc::new(config);

    info!(
        iface_prefix = %config.iface_prefix,
        hostname = %config.hostname,
        "starting enforcerd"
    );

    let devices: Arc<dyn DeviceApi> = Arc::new(ShellDeviceApi::new(Arc::clone(&config)));

    let mut managers = Vec::new();
    let mut dispatchers = Vec::new();
    for version in [IpVersion::V4, IpVersion::V6] {
        let firewall: Arc<dyn FirewallUpdater> =
            Arc::new(IptablesRestoreUpdater::new(version, Arc::clone(&config)));
        let dispatch = netpol_actor::spawn(DispatchChains::new(
            version,
            &config,
            Arc::clone(&firewall),
        ));
        // Program the (empty) root chains up front so traffic from
        // unknown interfaces is dropped from the start.
        if let Err(err) = dispatch.call(DispatchMsg::ApplySnapshot(BTreeSet::new())).await {
            anyhow::bail!("failed to program {} dispatch chains: {}", version, err);
        }
        managers.push(EndpointManager::new(
            version,
            (*config).clone(),
            Arc::clone(&devices),
            firewall,
            dispatch.clone(),
        ));
        dispatchers.push(dispatch);
    }

    // The data-store watcher feeds managers.on_endpoint_update /
    // on_interface_update; until one is wired in, the daemon holds the
    // programmed base chains in place.
    info!("enforcerd running");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    for manager in &mut managers {
        manager.shutdown().await;
    }
    for dispatch in &dispatchers {
        dispatch.stop().await;
    }
    Ok(())
}
