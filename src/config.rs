//! Operator configuration surface
//!
//! Everything tunable about the three controllers lives here; `main.rs`
//! populates it from flags and environment variables.

use std::time::Duration;

use crate::controller::retry::BackoffPolicy;

/// Default taint key gating nodes until cloud enrichment completes.
pub const DEFAULT_CLOUD_TAINT_KEY: &str = "ExternalCloudProvider";

/// Default label pinning an operator-supplied node IP.
pub const DEFAULT_PROVIDED_IP_LABEL: &str = "beta.kubernetes.io/provided-node-ip";

/// Read-only configuration shared by every controller task
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Period of the address reconciliation loop.
    pub address_sync_period: Duration,

    /// Period of the not-found deletion loop. Should stay below the node
    /// monitor grace period configured elsewhere in the control plane.
    pub node_monitor_period: Duration,

    /// Conflict retry policy for node updates.
    pub update_backoff: BackoffPolicy,

    /// Label whose value pins which cloud-reported address is
    /// authoritative for a node.
    pub provided_ip_label: String,

    /// Taint key marking a node as awaiting cloud enrichment.
    pub cloud_taint_key: String,

    /// Whether the active provider defers route programming; fresh nodes
    /// are then marked NetworkUnavailable until routes exist.
    pub deferred_routes: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            address_sync_period: Duration::from_secs(10),
            node_monitor_period: Duration::from_secs(5),
            update_backoff: BackoffPolicy::default(),
            provided_ip_label: DEFAULT_PROVIDED_IP_LABEL.to_string(),
            cloud_taint_key: DEFAULT_CLOUD_TAINT_KEY.to_string(),
            deferred_routes: false,
        }
    }
}
