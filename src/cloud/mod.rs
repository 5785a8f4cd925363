//! Cloud provider capability facade
//!
//! The operator consumes cloud inventory through these traits and never
//! mutates anything on the provider side. Concrete adapters for real
//! clouds live out of tree; the [`fake`] module ships an in-memory
//! implementation for tests and local development.

pub mod fake;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeAddress;
use kube::ResourceExt;
use thiserror::Error;

/// Errors surfaced by cloud lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The queried instance does not exist. This is the only error that
    /// authorizes deleting the backing node object; every other failure
    /// is inconclusive.
    #[error("instance not found")]
    InstanceNotFound,

    /// Any other provider-side failure
    #[error("cloud provider error: {0}")]
    Provider(String),
}

/// Region and failure domain reported by the provider for the control
/// plane's location. Copied into node labels, never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Zone {
    pub region: String,
    pub failure_domain: String,
}

/// Instance inventory queries
#[async_trait]
pub trait Instances: Send + Sync {
    /// Current network addresses of the named node.
    async fn node_addresses(&self, name: &str) -> Result<Vec<NodeAddress>, CloudError>;

    /// Current network addresses, looked up by cloud-assigned provider ID.
    async fn node_addresses_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Vec<NodeAddress>, CloudError>;

    /// Machine type of the named node.
    async fn instance_type(&self, name: &str) -> Result<String, CloudError>;

    /// Machine type, looked up by cloud-assigned provider ID.
    async fn instance_type_by_provider_id(&self, provider_id: &str)
        -> Result<String, CloudError>;

    /// Cloud-assigned identity for the named node.
    ///
    /// Fails with [`CloudError::InstanceNotFound`] when the backing
    /// instance no longer exists.
    async fn external_id(&self, name: &str) -> Result<String, CloudError>;
}

/// Zone/region queries
#[async_trait]
pub trait Zones: Send + Sync {
    async fn zone(&self) -> Result<Zone, CloudError>;
}

/// Entry point handed to the operator. Capabilities are optional; a
/// provider without instance support disables every controller here.
pub trait CloudProvider: Send + Sync {
    fn instances(&self) -> Option<Arc<dyn Instances>>;
    fn zones(&self) -> Option<Arc<dyn Zones>>;
    fn provider_name(&self) -> &str;
}

/// Resolve the cloud's current view of a node's addresses.
///
/// The provider-ID keyed lookup is preferred; any failure there falls
/// back to the name-keyed lookup, whose error is the one reported.
pub async fn resolve_node_addresses(
    instances: &dyn Instances,
    node: &Node,
) -> Result<Vec<NodeAddress>, CloudError> {
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default();

    match instances.node_addresses_by_provider_id(provider_id).await {
        Ok(addresses) => Ok(addresses),
        Err(_) => instances.node_addresses(&node.name_any()).await,
    }
}
