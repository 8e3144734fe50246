//! Domain types delivered by the data-store watcher.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Address family a reconciler instance operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Family selector flag for `ip` invocations.
    pub fn family_flag(&self) -> &'static str {
        match self {
            IpVersion::V4 => "-4",
            IpVersion::V6 => "-6",
        }
    }

    /// Host-route prefix length for this family.
    pub fn host_prefix_len(&self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Error returned when a MAC address string does not parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid MAC address '{0}'")]
pub struct MacParseError(pub String);

/// MAC address, rendered lowercase and colon-separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// All-zero MAC.
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// Returns true for the all-zero MAC.
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            bytes[count] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Global identity of one workload endpoint.
///
/// The four components never change for the lifetime of the endpoint;
/// the tuple is the key every update is routed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    /// Host the endpoint lives on.
    pub host: String,
    /// Orchestrator that owns the workload.
    pub orchestrator: String,
    /// Workload the endpoint belongs to.
    pub workload: String,
    /// Endpoint name, unique within the workload.
    pub endpoint: String,
}

impl EndpointId {
    /// Creates an id from its four components.
    pub fn new(
        host: impl Into<String>,
        orchestrator: impl Into<String>,
        workload: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            orchestrator: orchestrator.into(),
            workload: workload.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.host, self.orchestrator, self.workload, self.endpoint
        )
    }
}

/// Snapshot of one endpoint's desired state, as delivered by the data
/// store. Absence of a snapshot (`None` at the call site) means the
/// endpoint was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointData {
    /// Host-side interface name (e.g. "tap1234abcd").
    pub name: String,
    /// Registered MAC of the endpoint.
    pub mac: MacAddress,
    /// IPv4 addresses assigned to the endpoint.
    #[serde(default)]
    pub ipv4_nets: BTreeSet<String>,
    /// IPv6 addresses assigned to the endpoint.
    #[serde(default)]
    pub ipv6_nets: BTreeSet<String>,
    /// Optional IPv6 gateway.
    #[serde(default)]
    pub ipv6_gateway: Option<Ipv6Addr>,
    /// Profiles applied to the endpoint, in match order.
    #[serde(default)]
    pub profile_ids: Vec<String>,
}

impl EndpointData {
    /// Addresses for the given family.
    pub fn nets(&self, version: IpVersion) -> &BTreeSet<String> {
        match version {
            IpVersion::V4 => &self.ipv4_nets,
            IpVersion::V6 => &self.ipv6_nets,
        }
    }

    /// Gateway for the given family; only IPv6 carries one.
    pub fn gateway(&self, version: IpVersion) -> Option<Ipv6Addr> {
        match version {
            IpVersion::V4 => None,
            IpVersion::V6 => self.ipv6_gateway,
        }
    }
}
