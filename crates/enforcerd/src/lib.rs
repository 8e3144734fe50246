//! Per-host network-policy enforcement daemon.
//!
//! The daemon keeps each workload endpoint's interface, routes and
//! neighbor state in sync with the data-store description of the
//! endpoint, and programs a deterministic per-endpoint firewall chain
//! pair enforcing its ordered profile list:
//!
//! - [`endpoint_mgr`]: routes data-store updates to per-endpoint actors
//! - [`local_endpoint`]: the per-endpoint reconciliation state machine
//! - [`rules`]: deterministic chain synthesis
//! - [`dispatch`]: the root chains steering traffic to endpoint chains
//! - [`devices`], [`firewall`]: shell-backed collaborator
//!   implementations
//! - [`config`]: daemon configuration

pub mod config;
pub mod devices;
pub mod dispatch;
pub mod endpoint_mgr;
pub mod firewall;
pub mod local_endpoint;
pub mod rules;

pub use config::EnforcerConfig;
pub use endpoint_mgr::EndpointManager;
pub use local_endpoint::{EndpointMsg, LocalEndpoint};
