//! Deterministic synthesis of per-endpoint firewall chains.
//!
//! Chain contents are a pure function of the endpoint's identity,
//! interface suffix, MAC and ordered profile list: identical inputs
//! produce byte-identical rule lists, which is what lets the firewall
//! updater diff programmed state against desired state and lets the
//! reconciler re-apply chains idempotently.

use std::collections::{BTreeMap, BTreeSet};

use netpol_common::MacAddress;

/// Root chain traffic to endpoints is dispatched from.
pub const CHAIN_TO_ENDPOINT: &str = "npol-TO-ENDPOINT";

/// Root chain traffic from endpoints is dispatched from.
pub const CHAIN_FROM_ENDPOINT: &str = "npol-FROM-ENDPOINT";

/// Stem of the to-direction leaf dispatch chains.
pub const CHAIN_TO_LEAF: &str = "npol-TO-LEAF";

/// Stem of the from-direction leaf dispatch chains.
pub const CHAIN_FROM_LEAF: &str = "npol-FROM-LEAF";

const CHAIN_TO_PREFIX: &str = "npol-to-";
const CHAIN_FROM_PREFIX: &str = "npol-from-";
const PROFILE_CHAIN_PREFIX: &str = "npol-p-";

/// Returns the per-endpoint chain names `(to, from)` for an interface
/// suffix.
pub fn chain_names(suffix: &str) -> (String, String) {
    (
        format!("{}{}", CHAIN_TO_PREFIX, suffix),
        format!("{}{}", CHAIN_FROM_PREFIX, suffix),
    )
}

/// Returns the direction-qualified chain name for a profile.
pub fn profile_chain_name(profile_id: &str, inbound: bool) -> String {
    let direction = if inbound { "i" } else { "o" };
    format!("{}{}-{}", PROFILE_CHAIN_PREFIX, profile_id, direction)
}

/// Derives the chain-name suffix from an interface name by stripping
/// the configured prefix.
pub fn interface_to_suffix(iface_prefix: &str, iface: &str) -> String {
    iface.strip_prefix(iface_prefix).unwrap_or(iface).to_string()
}

/// Match fragment for traffic arriving from an interface.
pub fn iface_match_in(iface: &str) -> String {
    format!("--in-interface {}", iface)
}

/// Match fragment for traffic leaving through an interface.
pub fn iface_match_out(iface: &str) -> String {
    format!("--out-interface {}", iface)
}

/// Synthesizes the chain pair for one endpoint.
///
/// Returns the chain updates (name to ordered rule list) and, per
/// chain, the set of profile chains it jumps to. The from-chain guards
/// the endpoint's source MAC; both chains zero the packet mark, try
/// each profile in list order with a return-if-marked short circuit,
/// and fall through to a default drop naming the endpoint.
pub fn endpoint_chains(
    endpoint: &str,
    suffix: &str,
    mac: MacAddress,
    profile_ids: &[String],
) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, BTreeSet<String>>) {
    let (to_chain, from_chain) = chain_names(suffix);

    let mut updates = BTreeMap::new();
    let mut dependencies = BTreeMap::new();

    let (to_rules, to_deps) = direction_rules(&to_chain, endpoint, None, profile_ids, true);
    updates.insert(to_chain.clone(), to_rules);
    dependencies.insert(to_chain, to_deps);

    let (from_rules, from_deps) =
        direction_rules(&from_chain, endpoint, Some(mac), profile_ids, false);
    updates.insert(from_chain.clone(), from_rules);
    dependencies.insert(from_chain, from_deps);

    (updates, dependencies)
}

fn direction_rules(
    chain: &str,
    endpoint: &str,
    guard_mac: Option<MacAddress>,
    profile_ids: &[String],
    inbound: bool,
) -> (Vec<String>, BTreeSet<String>) {
    let mut rules = Vec::new();
    let mut deps = BTreeSet::new();

    // Baseline: clear the accept mark left by any earlier chain.
    rules.push(format!("--append {} --jump MARK --set-mark 0", chain));

    if let Some(mac) = guard_mac {
        rules.push(format!(
            "--append {} --match mac ! --mac-source {} --jump DROP \
             --match comment --comment \"Incorrect source MAC\"",
            chain, mac
        ));
    }

    for profile_id in profile_ids {
        let profile_chain = profile_chain_name(profile_id, inbound);
        rules.push(format!("--append {} --jump {}", chain, profile_chain));
        // First matching profile wins: a profile that accepted the
        // packet sets the mark bit and we return immediately.
        rules.push(format!(
            "--append {} --match mark --mark 1/1 --match comment \
             --comment \"Profile accepted packet\" --jump RETURN",
            chain
        ));
        deps.insert(profile_chain);
    }

    rules.push(format!(
        "--append {} --jump DROP -m comment --comment \
         \"Default DROP if no match (endpoint {}):\"",
        chain, endpoint
    ));

    (rules, deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chain_names_are_a_pure_function_of_the_suffix() {
        let (to, from) = chain_names("abcd");
        assert_eq!(to, "npol-to-abcd");
        assert_eq!(from, "npol-from-abcd");
    }

    #[test]
    fn profile_chain_names_are_direction_qualified() {
        assert_eq!(profile_chain_name("prof-1", true), "npol-p-prof-1-i");
        assert_eq!(profile_chain_name("prof-1", false), "npol-p-prof-1-o");
    }

    #[test]
    fn interface_suffix_strips_the_prefix() {
        assert_eq!(interface_to_suffix("tap", "tap1234abcd"), "1234abcd");
        assert_eq!(interface_to_suffix("tap", "eth0"), "eth0");
    }

    #[test]
    fn endpoint_chains_exact_contents_and_dependencies() {
        let mac: MacAddress = "aa:22:33:44:55:66".parse().unwrap();
        let profiles = vec!["prof-1".to_string(), "prof-2".to_string()];
        let (updates, deps) = endpoint_chains("e1", "abcd", mac, &profiles);

        let from_pfx = "--append npol-from-abcd";
        let to_pfx = "--append npol-to-abcd";

        let expected_from = vec![
            format!("{} --jump MARK --set-mark 0", from_pfx),
            format!(
                "{} --match mac ! --mac-source aa:22:33:44:55:66 --jump DROP \
                 --match comment --comment \"Incorrect source MAC\"",
                from_pfx
            ),
            format!("{} --jump npol-p-prof-1-o", from_pfx),
            format!(
                "{} --match mark --mark 1/1 --match comment \
                 --comment \"Profile accepted packet\" --jump RETURN",
                from_pfx
            ),
            format!("{} --jump npol-p-prof-2-o", from_pfx),
            format!(
                "{} --match mark --mark 1/1 --match comment \
                 --comment \"Profile accepted packet\" --jump RETURN",
                from_pfx
            ),
            format!(
                "{} --jump DROP -m comment --comment \
                 \"Default DROP if no match (endpoint e1):\"",
                from_pfx
            ),
        ];
        let expected_to = vec![
            format!("{} --jump MARK --set-mark 0", to_pfx),
            format!("{} --jump npol-p-prof-1-i", to_pfx),
            format!(
                "{} --match mark --mark 1/1 --match comment \
                 --comment \"Profile accepted packet\" --jump RETURN",
                to_pfx
            ),
            format!("{} --jump npol-p-prof-2-i", to_pfx),
            format!(
                "{} --match mark --mark 1/1 --match comment \
                 --comment \"Profile accepted packet\" --jump RETURN",
                to_pfx
            ),
            format!(
                "{} --jump DROP -m comment --comment \
                 \"Default DROP if no match (endpoint e1):\"",
                to_pfx
            ),
        ];

        assert_eq!(updates["npol-from-abcd"], expected_from);
        assert_eq!(updates["npol-to-abcd"], expected_to);

        let from_deps: BTreeSet<String> =
            ["npol-p-prof-1-o".to_string(), "npol-p-prof-2-o".to_string()].into();
        let to_deps: BTreeSet<String> =
            ["npol-p-prof-1-i".to_string(), "npol-p-prof-2-i".to_string()].into();
        assert_eq!(deps["npol-from-abcd"], from_deps);
        assert_eq!(deps["npol-to-abcd"], to_deps);
    }

    #[test]
    fn endpoint_chains_are_deterministic() {
        let mac: MacAddress = "aa:22:33:44:55:66".parse().unwrap();
        let profiles = vec!["prof-1".to_string(), "prof-2".to_string()];
        let first = endpoint_chains("e1", "abcd", mac, &profiles);
        let second = endpoint_chains("e1", "abcd", mac, &profiles);
        assert_eq!(first, second);
    }

    #[test]
    fn no_profiles_yields_mark_guard_and_drop_only() {
        let mac: MacAddress = "aa:22:33:44:55:66".parse().unwrap();
        let (updates, deps) = endpoint_chains("e1", "abcd", mac, &[]);
        assert_eq!(updates["npol-from-abcd"].len(), 3);
        assert_eq!(updates["npol-to-abcd"].len(), 2);
        assert!(deps["npol-from-abcd"].is_empty());
        assert!(deps["npol-to-abcd"].is_empty());
    }
}
