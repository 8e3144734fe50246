//! Supervision of the per-endpoint reconciler population.
//!
//! The manager is the single place reconciler actors are created and
//! removed; it routes updates by [`EndpointId`] and performs no
//! endpoint logic of its own. Entries are never created implicitly: a
//! deletion for an id that was never seen is dropped rather than
//! spinning up an actor just to tear it down.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use netpol_actor::{ActorError, ActorHandle};
use netpol_common::{DeviceApi, EndpointData, EndpointId, FirewallUpdater, IpVersion, NetpolError, NetpolResult};

use crate::config::EnforcerConfig;
use crate::dispatch::DispatchChains;
use crate::local_endpoint::{EndpointMsg, LocalEndpoint};

/// Owner of the id-to-reconciler map for one address family.
pub struct EndpointManager {
    version: IpVersion,
    config: EnforcerConfig,
    devices: Arc<dyn DeviceApi>,
    firewall: Arc<dyn FirewallUpdater>,
    dispatch: ActorHandle<DispatchChains>,
    endpoints: HashMap<EndpointId, ActorHandle<LocalEndpoint>>,
}

impl EndpointManager {
    /// Creates a manager for one address family.
    pub fn new(
        version: IpVersion,
        config: EnforcerConfig,
        devices: Arc<dyn DeviceApi>,
        firewall: Arc<dyn FirewallUpdater>,
        dispatch: ActorHandle<DispatchChains>,
    ) -> Self {
        Self {
            version,
            config,
            devices,
            firewall,
            dispatch,
            endpoints: HashMap::new(),
        }
    }

    /// Routes an endpoint snapshot to its reconciler, starting one on
    /// first sight and retiring it after a deletion is processed.
    ///
    /// Blocks until the reconciler has processed the update; the
    /// result is the reconciler's own.
    pub async fn on_endpoint_update(
        &mut self,
        id: &EndpointId,
        data: Option<EndpointData>,
    ) -> NetpolResult<()> {
        let deleting = data.is_none();
        let handle = match self.endpoints.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if deleting {
                    debug!(endpoint = %id, "delete for unknown endpoint, ignoring");
                    return Ok(());
                }
                info!(endpoint = %id, version = %self.version, "starting endpoint reconciler");
                let actor = LocalEndpoint::new(
                    id.clone(),
                    self.version,
                    &self.config,
                    Arc::clone(&self.devices),
                    Arc::clone(&self.firewall),
                    self.dispatch.clone(),
                );
                entry.insert(netpol_actor::spawn(actor))
            }
        };

        let result = handle.call(EndpointMsg::EndpointUpdate(data)).await;
        if deleting {
            if let Some(handle) = self.endpoints.remove(id) {
                handle.stop().await;
                info!(endpoint = %id, "endpoint reconciler retired");
            }
        }
        flatten(result)
    }

    /// Routes an interface-level OS event to the endpoint's
    /// reconciler; unknown ids are ignored.
    pub async fn on_interface_update(&mut self, id: &EndpointId) -> NetpolResult<()> {
        match self.endpoints.get(id) {
            Some(handle) => flatten(handle.call(EndpointMsg::InterfaceUpdate).await),
            None => {
                debug!(endpoint = %id, "interface event for unknown endpoint, ignoring");
                Ok(())
            }
        }
    }

    /// Returns true if a reconciler exists for the id.
    pub fn contains(&self, id: &EndpointId) -> bool {
        self.endpoints.contains_key(id)
    }

    /// Number of live reconcilers.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if no reconcilers are live.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Stops every reconciler.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.endpoints.drain() {
            handle.stop().await;
        }
    }
}

fn flatten(result: Result<(), ActorError<NetpolError>>) -> NetpolResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(ActorError::Failed(err)) => Err(err),
        Err(ActorError::Stopped) => Err(NetpolError::internal("endpoint reconciler stopped")),
    }
}
