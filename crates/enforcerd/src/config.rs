//! Daemon configuration.
//!
//! Deployment settings come from the environment (`ENFORCER_*`
//! variables) with command-line overrides applied in `main`.

use netpol_common::shell::{
    IP6TABLES_CMD, IP6TABLES_RESTORE_CMD, IPTABLES_CMD, IPTABLES_RESTORE_CMD, IP_CMD, SYSCTL_CMD,
};
use netpol_common::{IpVersion, NetpolError, NetpolResult};

/// Runtime configuration for the enforcement daemon.
#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    /// Prefix every workload interface name carries (e.g. "tap").
    pub iface_prefix: String,
    /// Name of this host, as it appears in endpoint identities.
    pub hostname: String,
    /// Path to the `ip` command.
    pub ip_cmd: String,
    /// Path to the `sysctl` command.
    pub sysctl_cmd: String,
    /// Path to `iptables-restore`.
    pub iptables_restore_cmd: String,
    /// Path to `ip6tables-restore`.
    pub ip6tables_restore_cmd: String,
    /// Path to `iptables`.
    pub iptables_cmd: String,
    /// Path to `ip6tables`.
    pub ip6tables_cmd: String,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            iface_prefix: "tap".to_string(),
            hostname: "localhost".to_string(),
            ip_cmd: IP_CMD.to_string(),
            sysctl_cmd: SYSCTL_CMD.to_string(),
            iptables_restore_cmd: IPTABLES_RESTORE_CMD.to_string(),
            ip6tables_restore_cmd: IP6TABLES_RESTORE_CMD.to_string(),
            iptables_cmd: IPTABLES_CMD.to_string(),
            ip6tables_cmd: IP6TABLES_CMD.to_string(),
        }
    }
}

impl EnforcerConfig {
    /// Builds a configuration from defaults plus `ENFORCER_*`
    /// environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("ENFORCER_IFACE_PREFIX") {
            config.iface_prefix = prefix;
        }
        if let Ok(hostname) = std::env::var("ENFORCER_HOSTNAME").or_else(|_| std::env::var("HOSTNAME")) {
            config.hostname = hostname;
        }
        if let Ok(ip_cmd) = std::env::var("ENFORCER_IP_CMD") {
            config.ip_cmd = ip_cmd;
        }
        config
    }

    /// Validates the configuration.
    pub fn validate(&self) -> NetpolResult<()> {
        if self.iface_prefix.is_empty() {
            return Err(NetpolError::invalid_config(
                "iface_prefix",
                "must not be empty",
            ));
        }
        if self.hostname.is_empty() {
            return Err(NetpolError::invalid_config("hostname", "must not be empty"));
        }
        Ok(())
    }

    /// `iptables-restore` binary for the given family.
    pub fn restore_cmd(&self, version: IpVersion) -> &str {
        match version {
            IpVersion::V4 => &self.iptables_restore_cmd,
            IpVersion::V6 => &self.ip6tables_restore_cmd,
        }
    }

    /// `iptables` binary for the given family.
    pub fn tables_cmd(&self, version: IpVersion) -> &str {
        match version {
            IpVersion::V4 => &self.iptables_cmd,
            IpVersion::V6 => &self.ip6tables_cmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EnforcerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.iface_prefix, "tap");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let config = EnforcerConfig {
            iface_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NetpolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn restore_cmd_selects_family() {
        let config = EnforcerConfig::default();
        assert_eq!(config.restore_cmd(IpVersion::V4), IPTABLES_RESTORE_CMD);
        assert_eq!(config.restore_cmd(IpVersion::V6), IP6TABLES_RESTORE_CMD);
        assert_eq!(config.tables_cmd(IpVersion::V6), IP6TABLES_CMD);
    }
}
