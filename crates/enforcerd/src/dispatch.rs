//! Actor owning the root dispatch chains.
//!
//! The root chains steer traffic to the per-endpoint chains. Endpoint
//! reconcilers notify this actor as endpoints come and go; rewrites are
//! deferred to the batch flush so a burst of endpoint churn costs one
//! firewall transaction.
//!
//! To keep the root chains short, interfaces whose suffixes share a
//! first character are dispatched through a leaf chain for that
//! character once there is more than one of them; a lone interface is
//! dispatched straight from the root chain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use netpol_actor::{Actor, BatchError, BatchResult};
use netpol_common::{FirewallUpdater, IpVersion, NetpolError};

use crate::config::EnforcerConfig;
use crate::rules::{
    chain_names, iface_match_in, iface_match_out, interface_to_suffix, CHAIN_FROM_ENDPOINT,
    CHAIN_FROM_LEAF, CHAIN_TO_ENDPOINT, CHAIN_TO_LEAF,
};

/// Messages accepted by the dispatch-chains actor.
#[derive(Debug, Clone)]
pub enum DispatchMsg {
    /// Replaces the known interface set and rewrites the chains, even
    /// when the set is unchanged, so programmed state re-converges
    /// after a restart.
    ApplySnapshot(BTreeSet<String>),
    /// An endpoint's interface is now configured. Idempotent.
    EndpointAdded(String),
    /// An endpoint's interface went away. Idempotent.
    EndpointRemoved(String),
}

/// Actor state for one address family's dispatch chains.
pub struct DispatchChains {
    name: String,
    iface_prefix: String,
    firewall: Arc<dyn FirewallUpdater>,
    ifaces: BTreeSet<String>,
    programmed_leaf_chains: BTreeSet<String>,
    dirty: bool,
}

struct DispatchUpdate {
    updates: BTreeMap<String, Vec<String>>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    new_leaf_chains: BTreeSet<String>,
    to_delete: BTreeSet<String>,
}

impl DispatchChains {
    /// Creates the dispatch actor for one address family.
    pub fn new(
        version: IpVersion,
        config: &EnforcerConfig,
        firewall: Arc<dyn FirewallUpdater>,
    ) -> Self {
        let name = match version {
            IpVersion::V4 => "dispatch-v4".to_string(),
            IpVersion::V6 => "dispatch-v6".to_string(),
        };
        Self {
            name,
            iface_prefix: config.iface_prefix.clone(),
            firewall,
            ifaces: BTreeSet::new(),
            programmed_leaf_chains: BTreeSet::new(),
            dirty: false,
        }
    }

    /// Calculates the full rewrite for the current interface set.
    fn calculate_update(&self) -> DispatchUpdate {
        let mut updates: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        updates.insert(CHAIN_TO_ENDPOINT.to_string(), Vec::new());
        updates.insert(CHAIN_FROM_ENDPOINT.to_string(), Vec::new());
        dependencies.insert(CHAIN_TO_ENDPOINT.to_string(), BTreeSet::new());
        dependencies.insert(CHAIN_FROM_ENDPOINT.to_string(), BTreeSet::new());

        // Group interfaces by the first character of their suffix; the
        // group decides whether dispatch goes through a leaf chain.
        let mut by_prefix: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for iface in &self.ifaces {
            let suffix = interface_to_suffix(&self.iface_prefix, iface);
            let prefix = suffix.chars().take(1).collect::<String>();
            by_prefix.entry(prefix).or_default().insert(iface);
        }

        let mut new_leaf_chains = BTreeSet::new();
        for (prefix, group) in by_prefix {
            let use_root_chain = group.len() == 1;
            let (to_dispatch, from_dispatch) = if use_root_chain {
                (CHAIN_TO_ENDPOINT.to_string(), CHAIN_FROM_ENDPOINT.to_string())
            } else {
                let to_leaf = format!("{}-{}", CHAIN_TO_LEAF, prefix);
                let from_leaf = format!("{}-{}", CHAIN_FROM_LEAF, prefix);
                new_leaf_chains.insert(to_leaf.clone());
                new_leaf_chains.insert(from_leaf.clone());

                // Root chains depend on their leaves and route to them
                // on an interface-name wildcard.
                let wildcard = format!("{}{}+", self.iface_prefix, prefix);
                if let Some(deps) = dependencies.get_mut(CHAIN_FROM_ENDPOINT) {
                    deps.insert(from_leaf.clone());
                }
                if let Some(deps) = dependencies.get_mut(CHAIN_TO_ENDPOINT) {
                    deps.insert(to_leaf.clone());
                }
                if let Some(rules) = updates.get_mut(CHAIN_FROM_ENDPOINT) {
                    rules.push(format!(
                        "--append {} {} --goto {}",
                        CHAIN_FROM_ENDPOINT,
                        iface_match_in(&wildcard),
                        from_leaf
                    ));
                }
                if let Some(rules) = updates.get_mut(CHAIN_TO_ENDPOINT) {
                    rules.push(format!(
                        "--append {} {} --goto {}",
                        CHAIN_TO_ENDPOINT,
                        iface_match_out(&wildcard),
                        to_leaf
                    ));
                }
                (to_leaf, from_leaf)
            };

            for iface in group {
                // --goto rather than --jump: the endpoint chain returns
                // to this chain's parent, not to this chain.
                let suffix = interface_to_suffix(&self.iface_prefix, iface);
                let (to_chain, from_chain) = chain_names(&suffix);
                let from_rules = updates.entry(from_dispatch.clone()).or_default();
                from_rules.push(format!(
                    "--append {} {} --goto {}",
                    from_dispatch,
                    iface_match_in(iface),
                    from_chain
                ));
                dependencies
                    .entry(from_dispatch.clone())
                    .or_default()
                    .insert(from_chain);
                let to_rules = updates.entry(to_dispatch.clone()).or_default();
                to_rules.push(format!(
                    "--append {} {} --goto {}",
                    to_dispatch,
                    iface_match_out(iface),
                    to_chain
                ));
                dependencies
                    .entry(to_dispatch.clone())
                    .or_default()
                    .insert(to_chain);
            }

            if !use_root_chain {
                if let Some(rules) = updates.get_mut(&from_dispatch) {
                    rules.push(format!("--append {} --jump DROP", from_dispatch));
                }
                if let Some(rules) = updates.get_mut(&to_dispatch) {
                    rules.push(format!("--append {} --jump DROP", to_dispatch));
                }
            }
        }

        // Interfaces not yet known to us must not bypass policy.
        if let Some(rules) = updates.get_mut(CHAIN_FROM_ENDPOINT) {
            rules.push(format!("--append {} --jump DROP", CHAIN_FROM_ENDPOINT));
        }
        if let Some(rules) = updates.get_mut(CHAIN_TO_ENDPOINT) {
            rules.push(format!("--append {} --jump DROP", CHAIN_TO_ENDPOINT));
        }

        let to_delete = self
            .programmed_leaf_chains
            .difference(&new_leaf_chains)
            .cloned()
            .collect();

        DispatchUpdate {
            updates,
            dependencies,
            new_leaf_chains,
            to_delete,
        }
    }

    async fn reprogram(&mut self) -> Result<(), NetpolError> {
        info!(actor = %self.name, ifaces = self.ifaces.len(), "rewriting dispatch chains");
        let update = self.calculate_update();
        self.firewall
            .rewrite_chains(update.updates, update.dependencies)
            .await?;
        if !update.to_delete.is_empty() {
            self.firewall.delete_chains(update.to_delete).await?;
        }
        self.programmed_leaf_chains = update.new_leaf_chains;
        Ok(())
    }
}

#[async_trait]
impl Actor for DispatchChains {
    type Msg = DispatchMsg;
    type Reply = ();
    type Error = NetpolError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn on_message(&mut self, msg: &DispatchMsg) -> Result<(), NetpolError> {
        match msg {
            DispatchMsg::ApplySnapshot(ifaces) => {
                debug!(actor = %self.name, count = ifaces.len(), "applying interface snapshot");
                self.ifaces = ifaces.clone();
                self.dirty = true;
            }
            DispatchMsg::EndpointAdded(iface) => {
                if self.ifaces.insert(iface.clone()) {
                    self.dirty = true;
                }
            }
            DispatchMsg::EndpointRemoved(iface) => {
                if self.ifaces.remove(iface) {
                    self.dirty = true;
                } else {
                    warn!(actor = %self.name, iface = %iface, "asked to remove unmanaged interface");
                }
            }
        }
        Ok(())
    }

    async fn finish_batch(&mut self, _batch: &[DispatchMsg]) -> BatchResult<NetpolError> {
        if self.dirty {
            self.reprogram().await.map_err(BatchError::Fail)?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpol_testing::{FirewallCall, RecordingFirewall};
    use pretty_assertions::assert_eq;

    fn dispatch(firewall: Arc<RecordingFirewall>) -> netpol_actor::ActorHandle<DispatchChains> {
        let config = EnforcerConfig::default();
        netpol_actor::spawn(DispatchChains::new(IpVersion::V4, &config, firewall))
    }

    fn rewrites(calls: &[FirewallCall]) -> Vec<&BTreeMap<String, Vec<String>>> {
        calls
            .iter()
            .filter_map(|c| match c {
                FirewallCall::Rewrite { updates, .. } => Some(updates),
                FirewallCall::Delete { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn lone_interface_dispatches_from_the_root_chains() {
        let firewall = RecordingFirewall::shared();
        let handle = dispatch(Arc::clone(&firewall));

        handle
            .call(DispatchMsg::ApplySnapshot(["tapA1".to_string()].into()))
            .await
            .unwrap();

        let calls = firewall.calls();
        let updates = rewrites(&calls)[0];
        assert_eq!(
            updates["npol-FROM-ENDPOINT"],
            vec![
                "--append npol-FROM-ENDPOINT --in-interface tapA1 --goto npol-from-A1".to_string(),
                "--append npol-FROM-ENDPOINT --jump DROP".to_string(),
            ]
        );
        assert_eq!(
            updates["npol-TO-ENDPOINT"],
            vec![
                "--append npol-TO-ENDPOINT --out-interface tapA1 --goto npol-to-A1".to_string(),
                "--append npol-TO-ENDPOINT --jump DROP".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn shared_prefix_moves_dispatch_into_leaf_chains() {
        let firewall = RecordingFirewall::shared();
        let handle = dispatch(Arc::clone(&firewall));

        handle
            .call(DispatchMsg::ApplySnapshot(
                ["tapA1".to_string(), "tapB1".to_string(), "tapB2".to_string()].into(),
            ))
            .await
            .unwrap();

        let calls = firewall.calls();
        let updates = rewrites(&calls)[0];

        // tapA1 is alone under prefix "A" and stays in the root chain;
        // tapB1/tapB2 share prefix "B" and go through a leaf.
        assert_eq!(
            updates["npol-FROM-ENDPOINT"],
            vec![
                "--append npol-FROM-ENDPOINT --in-interface tapA1 --goto npol-from-A1".to_string(),
                "--append npol-FROM-ENDPOINT --in-interface tapB+ --goto npol-FROM-LEAF-B"
                    .to_string(),
                "--append npol-FROM-ENDPOINT --jump DROP".to_string(),
            ]
        );
        assert_eq!(
            updates["npol-FROM-LEAF-B"],
            vec![
                "--append npol-FROM-LEAF-B --in-interface tapB1 --goto npol-from-B1".to_string(),
                "--append npol-FROM-LEAF-B --in-interface tapB2 --goto npol-from-B2".to_string(),
                "--append npol-FROM-LEAF-B --jump DROP".to_string(),
            ]
        );
        assert_eq!(
            updates["npol-TO-LEAF-B"],
            vec![
                "--append npol-TO-LEAF-B --out-interface tapB1 --goto npol-to-B1".to_string(),
                "--append npol-TO-LEAF-B --out-interface tapB2 --goto npol-to-B2".to_string(),
                "--append npol-TO-LEAF-B --jump DROP".to_string(),
            ]
        );

        match &calls[0] {
            FirewallCall::Rewrite { dependencies, .. } => {
                assert!(dependencies["npol-FROM-ENDPOINT"].contains("npol-FROM-LEAF-B"));
                assert!(dependencies["npol-FROM-ENDPOINT"].contains("npol-from-A1"));
                assert!(dependencies["npol-FROM-LEAF-B"].contains("npol-from-B1"));
                assert!(dependencies["npol-TO-ENDPOINT"].contains("npol-TO-LEAF-B"));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_leaf_chains_are_deleted_on_the_next_rewrite() {
        let firewall = RecordingFirewall::shared();
        let handle = dispatch(Arc::clone(&firewall));

        handle
            .call(DispatchMsg::ApplySnapshot(
                ["tapB1".to_string(), "tapB2".to_string()].into(),
            ))
            .await
            .unwrap();
        handle
            .call(DispatchMsg::EndpointRemoved("tapB2".to_string()))
            .await
            .unwrap();

        let calls = firewall.calls();
        let deletes: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                FirewallCall::Delete { chains } => Some(chains.clone()),
                FirewallCall::Rewrite { .. } => None,
            })
            .collect();
        let expected: BTreeSet<String> =
            ["npol-FROM-LEAF-B".to_string(), "npol-TO-LEAF-B".to_string()].into();
        assert_eq!(deletes, vec![expected]);
    }

    #[tokio::test]
    async fn redundant_adds_do_not_rewrite() {
        let firewall = RecordingFirewall::shared();
        let handle = dispatch(Arc::clone(&firewall));

        handle
            .call(DispatchMsg::EndpointAdded("tapA1".to_string()))
            .await
            .unwrap();
        let after_first = firewall.calls().len();

        handle
            .call(DispatchMsg::EndpointAdded("tapA1".to_string()))
            .await
            .unwrap();
        assert_eq!(firewall.calls().len(), after_first);
    }
}
