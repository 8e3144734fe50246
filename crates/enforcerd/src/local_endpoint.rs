//! Per-endpoint reconciliation state machine.
//!
//! One actor instance owns one endpoint (for one address family) and
//! is the only code that touches that endpoint's kernel and firewall
//! state. Updates are idempotent: reapplying an unchanged snapshot
//! redoes the cheap bookkeeping but does not reset the neighbor cache,
//! and stored state only advances after the OS calls succeed, so a
//! failed update is safely retried by the next one.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use netpol_actor::{Actor, ActorHandle};
use netpol_common::{
    DeviceApi, EndpointData, EndpointId, FirewallUpdater, IpVersion, MacAddress, NetpolError,
};

use crate::config::EnforcerConfig;
use crate::dispatch::{DispatchChains, DispatchMsg};
use crate::rules::{chain_names, endpoint_chains, interface_to_suffix};

/// Messages accepted by an endpoint reconciler.
#[derive(Debug, Clone)]
pub enum EndpointMsg {
    /// A new snapshot from the data store; `None` means the endpoint
    /// was deleted.
    EndpointUpdate(Option<EndpointData>),
    /// The OS reported the interface changed (e.g. link came up);
    /// re-apply the stored state.
    InterfaceUpdate,
}

/// State applied by the last successful endpoint update.
#[derive(Debug, Clone)]
struct AppliedState {
    iface: String,
    mac: MacAddress,
    nets: BTreeSet<String>,
    gateway: Option<Ipv6Addr>,
    profile_ids: Vec<String>,
    /// The neighbor-reset flag used by the last update, replayed
    /// verbatim by interface updates.
    reset_neighbor: bool,
}

/// Reconciler actor for one endpoint and address family.
pub struct LocalEndpoint {
    name: String,
    id: EndpointId,
    version: IpVersion,
    iface_prefix: String,
    devices: Arc<dyn DeviceApi>,
    firewall: Arc<dyn FirewallUpdater>,
    dispatch: ActorHandle<DispatchChains>,
    /// `Some` once the endpoint has been configured.
    state: Option<AppliedState>,
}

impl LocalEndpoint {
    /// Creates the reconciler for one endpoint.
    pub fn new(
        id: EndpointId,
        version: IpVersion,
        config: &EnforcerConfig,
        devices: Arc<dyn DeviceApi>,
        firewall: Arc<dyn FirewallUpdater>,
        dispatch: ActorHandle<DispatchChains>,
    ) -> Self {
        let name = match version {
            IpVersion::V4 => format!("endpoint-{}-v4", id.endpoint),
            IpVersion::V6 => format!("endpoint-{}-v6", id.endpoint),
        };
        Self {
            name,
            id,
            version,
            iface_prefix: config.iface_prefix.clone(),
            devices,
            firewall,
            dispatch,
            state: None,
        }
    }

    /// Returns true once the endpoint has been configured.
    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    async fn on_endpoint_update(&mut self, data: Option<&EndpointData>) -> Result<(), NetpolError> {
        match data {
            Some(data) => self.apply_update(data).await,
            None => self.remove_endpoint().await,
        }
    }

    async fn apply_update(&mut self, data: &EndpointData) -> Result<(), NetpolError> {
        if data.name.is_empty() {
            return Err(NetpolError::invalid_endpoint(
                self.id.to_string(),
                "missing interface name",
            ));
        }
        if let Some(state) = &self.state {
            // Identity fields never change for a live endpoint; only
            // MAC, addresses, gateway and profiles may.
            if state.iface != data.name {
                return Err(NetpolError::invalid_endpoint(
                    self.id.to_string(),
                    format!(
                        "interface name changed from '{}' to '{}'",
                        state.iface, data.name
                    ),
                ));
            }
        }

        let mac_changed = self.state.as_ref().map(|s| s.mac) != Some(data.mac);
        // Neighbor resets only mean anything for IPv4; IPv6 neighbor
        // discovery is never force-reset from this path.
        let reset_neighbor = mac_changed && self.version == IpVersion::V4;
        let nets = data.nets(self.version).clone();
        let gateway = data.gateway(self.version);

        match self.version {
            IpVersion::V4 => self.devices.configure_interface_v4(&data.name).await?,
            IpVersion::V6 => {
                self.devices
                    .configure_interface_v6(&data.name, gateway)
                    .await?
            }
        }
        self.devices
            .set_routes(self.version, &nets, &data.name, Some(data.mac), reset_neighbor)
            .await?;

        let suffix = interface_to_suffix(&self.iface_prefix, &data.name);
        let (chains, dependencies) =
            endpoint_chains(&self.id.endpoint, &suffix, data.mac, &data.profile_ids);
        self.firewall.rewrite_chains(chains, dependencies).await?;

        let newly_configured = self.state.is_none();
        self.state = Some(AppliedState {
            iface: data.name.clone(),
            mac: data.mac,
            nets,
            gateway,
            profile_ids: data.profile_ids.clone(),
            reset_neighbor,
        });
        if newly_configured {
            if let Err(err) = self
                .dispatch
                .send(DispatchMsg::EndpointAdded(data.name.clone()))
            {
                warn!(endpoint = %self.id, error = %err, "dispatch chains unavailable");
            }
        }
        info!(
            endpoint = %self.id,
            iface = %data.name,
            version = %self.version,
            reset_neighbor,
            "endpoint configured"
        );
        Ok(())
    }

    async fn remove_endpoint(&mut self) -> Result<(), NetpolError> {
        let Some(state) = self.state.clone() else {
            debug!(endpoint = %self.id, "delete for unconfigured endpoint, nothing to do");
            return Ok(());
        };

        // Withdraw routes: empty address set, no MAC.
        self.devices
            .set_routes(self.version, &BTreeSet::new(), &state.iface, None, false)
            .await?;

        let suffix = interface_to_suffix(&self.iface_prefix, &state.iface);
        let (to_chain, from_chain) = chain_names(&suffix);
        self.firewall
            .delete_chains([to_chain, from_chain].into())
            .await?;

        self.state = None;
        if let Err(err) = self
            .dispatch
            .send(DispatchMsg::EndpointRemoved(state.iface.clone()))
        {
            warn!(endpoint = %self.id, error = %err, "dispatch chains unavailable");
        }
        info!(endpoint = %self.id, iface = %state.iface, "endpoint removed");
        Ok(())
    }

    /// Re-applies the stored configuration after an interface-level OS
    /// event. Must reproduce exactly the device calls of the last
    /// successful update.
    async fn on_interface_update(&mut self) -> Result<(), NetpolError> {
        let Some(state) = self.state.clone() else {
            debug!(endpoint = %self.id, "interface event before configuration, ignoring");
            return Ok(());
        };

        match self.version {
            IpVersion::V4 => self.devices.configure_interface_v4(&state.iface).await?,
            IpVersion::V6 => {
                self.devices
                    .configure_interface_v6(&state.iface, state.gateway)
                    .await?
            }
        }
        self.devices
            .set_routes(
                self.version,
                &state.nets,
                &state.iface,
                Some(state.mac),
                state.reset_neighbor,
            )
            .await?;
        info!(endpoint = %self.id, iface = %state.iface, "interface reconfigured");
        Ok(())
    }
}

#[async_trait]
impl Actor for LocalEndpoint {
    type Msg = EndpointMsg;
    type Reply = ();
    type Error = NetpolError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn on_message(&mut self, msg: &EndpointMsg) -> Result<(), NetpolError> {
        match msg {
            EndpointMsg::EndpointUpdate(data) => self.on_endpoint_update(data.as_ref()).await,
            EndpointMsg::InterfaceUpdate => self.on_interface_update().await,
        }
    }
}
