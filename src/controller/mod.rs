//! Node lifecycle controllers
//!
//! Three independent actors share the cluster store as their only point
//! of coordination: the initializer enriches freshly registered nodes and
//! lifts the gating taint, the address sync loop keeps reported network
//! addresses current, and the reaper deletes nodes whose backing cloud
//! instance is gone. None of them holds node state across operations;
//! every mutation re-fetches and writes conditionally.

pub mod address_sync;
pub mod conditions;
mod initializer;
pub mod nodes;
mod reaper;
pub mod retry;
pub mod taints;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kube::Client;

use crate::cloud::CloudProvider;
use crate::config::OperatorConfig;

pub use address_sync::{reconcile_addresses, run_address_sync};
pub use initializer::{
    enriched_node, event_channel, initialize_node, run_initializer, watch_nodes, NodeAdded,
};
pub use reaper::{instance_gone, run_reaper};

/// Well-known node labels written by the initializer
pub const LABEL_INSTANCE_TYPE: &str = "beta.kubernetes.io/instance-type";
pub const LABEL_ZONE_FAILURE_DOMAIN: &str = "failure-domain.beta.kubernetes.io/zone";
pub const LABEL_ZONE_REGION: &str = "failure-domain.beta.kubernetes.io/region";

/// Shared, read-only context handed to every controller task
pub struct ControllerState {
    pub client: Client,
    pub cloud: Arc<dyn CloudProvider>,
    pub config: OperatorConfig,
    pub is_leader: Arc<AtomicBool>,
}
