//! Shell-backed implementation of the firewall updater.
//!
//! Chain rewrites are rendered as an `iptables-restore --noflush`
//! program fed on stdin, one transaction per batch of updates. The
//! dependency map names every chain the new rules reference; chains
//! that are referenced but not rewritten are created (empty) first if
//! missing, so a rule can never land pointing at a nonexistent chain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use netpol_common::shell;
use netpol_common::{FirewallUpdater, IpVersion, NetpolError, NetpolResult};

use crate::config::EnforcerConfig;

/// Firewall updater that drives `iptables-restore`.
pub struct IptablesRestoreUpdater {
    version: IpVersion,
    config: Arc<EnforcerConfig>,
}

impl IptablesRestoreUpdater {
    /// Creates the updater for one address family.
    pub fn new(version: IpVersion, config: Arc<EnforcerConfig>) -> Self {
        Self { version, config }
    }
}

/// Renders the restore program for a chain rewrite.
///
/// Declaring a chain with `:<name> -` flushes it, so only the chains
/// being rewritten are declared; referenced chains are handled
/// separately to preserve their contents.
fn render_restore_program(updates: &BTreeMap<String, Vec<String>>) -> String {
    let mut program = String::from("*filter\n");
    for chain in updates.keys() {
        program.push_str(&format!(":{} -\n", chain));
    }
    for rules in updates.values() {
        for rule in rules {
            program.push_str(rule);
            program.push('\n');
        }
    }
    program.push_str("COMMIT\n");
    program
}

/// Chains referenced by the update but not rewritten by it.
fn missing_dependencies(
    updates: &BTreeMap<String, Vec<String>>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    dependencies
        .values()
        .flatten()
        .filter(|chain| !updates.contains_key(*chain))
        .cloned()
        .collect()
}

#[async_trait]
impl FirewallUpdater for IptablesRestoreUpdater {
    async fn rewrite_chains(
        &self,
        updates: BTreeMap<String, Vec<String>>,
        dependencies: BTreeMap<String, BTreeSet<String>>,
    ) -> NetpolResult<()> {
        let tables_cmd = self.config.tables_cmd(self.version);
        for chain in missing_dependencies(&updates, &dependencies) {
            // Create-if-absent; a non-zero exit means the chain is
            // already there, which is what we want.
            let command = format!("{} -t filter -N {}", tables_cmd, chain);
            let result = shell::exec(&command).await?;
            if !result.success() {
                debug!(chain = %chain, "referenced chain already exists");
            }
        }

        let program = render_restore_program(&updates);
        let command = format!("{} --noflush", self.config.restore_cmd(self.version));
        info!(
            version = %self.version,
            chains = updates.len(),
            "applying chain rewrite"
        );
        let result = shell::exec_with_input(&command, Some(&program)).await?;
        if !result.success() {
            return Err(NetpolError::firewall(format!(
                "'{}' exited {}: {}",
                command,
                result.exit_code,
                result.combined_output()
            )));
        }
        Ok(())
    }

    async fn delete_chains(&self, chains: BTreeSet<String>) -> NetpolResult<()> {
        let tables_cmd = self.config.tables_cmd(self.version);
        info!(version = %self.version, chains = chains.len(), "deleting chains");
        for chain in &chains {
            shell::exec_or_throw(&format!("{} -t filter -F {}", tables_cmd, chain))
                .await
                .map_err(|err| NetpolError::firewall(err.to_string()))?;
            shell::exec_or_throw(&format!("{} -t filter -X {}", tables_cmd, chain))
                .await
                .map_err(|err| NetpolError::firewall(err.to_string()))?;
        }
        Ok(())
    }
}
