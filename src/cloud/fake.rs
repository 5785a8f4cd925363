//! In-memory cloud provider
//!
//! Backs the test suite and the `--cloud-provider fake` development mode.
//! Lookups answer from fixed maps; an unknown node name on `external_id`
//! is reported with the distinguished not-found error, and names
//! registered through [`FakeCloudBuilder::lookup_failure`] fail with a
//! generic provider error instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::NodeAddress;

use super::{CloudError, CloudProvider, Instances, Zone, Zones};

#[derive(Default)]
struct Inner {
    addresses: HashMap<String, Vec<NodeAddress>>,
    addresses_by_provider_id: HashMap<String, Vec<NodeAddress>>,
    instance_types: HashMap<String, String>,
    instance_types_by_provider_id: HashMap<String, String>,
    external_ids: HashMap<String, String>,
    failing: HashSet<String>,
    zone: Option<Zone>,
}

/// Fixture-style cloud provider
#[derive(Clone)]
pub struct FakeCloud {
    inner: Arc<Inner>,
}

impl FakeCloud {
    pub fn builder() -> FakeCloudBuilder {
        FakeCloudBuilder::default()
    }
}

/// Configures a [`FakeCloud`] before it is handed to the operator
#[derive(Default)]
pub struct FakeCloudBuilder {
    inner: Inner,
}

impl FakeCloudBuilder {
    /// Record the addresses returned for a node name.
    pub fn node_addresses(mut self, name: &str, addresses: Vec<NodeAddress>) -> Self {
        self.inner.addresses.insert(name.to_string(), addresses);
        self
    }

    /// Record the addresses returned for a provider ID.
    pub fn provider_id_addresses(mut self, provider_id: &str, addresses: Vec<NodeAddress>) -> Self {
        self.inner
            .addresses_by_provider_id
            .insert(provider_id.to_string(), addresses);
        self
    }

    /// Record the instance type returned for a node name.
    pub fn instance_type(mut self, name: &str, instance_type: &str) -> Self {
        self.inner
            .instance_types
            .insert(name.to_string(), instance_type.to_string());
        self
    }

    /// Record the instance type returned for a provider ID.
    pub fn provider_id_instance_type(mut self, provider_id: &str, instance_type: &str) -> Self {
        self.inner
            .instance_types_by_provider_id
            .insert(provider_id.to_string(), instance_type.to_string());
        self
    }

    /// Register a live instance; `external_id` succeeds for it.
    pub fn instance(mut self, name: &str, external_id: &str) -> Self {
        self.inner
            .external_ids
            .insert(name.to_string(), external_id.to_string());
        self
    }

    /// Make every lookup for this node name fail with a generic error.
    pub fn lookup_failure(mut self, name: &str) -> Self {
        self.inner.failing.insert(name.to_string());
        self
    }

    /// Report a zone; enables the `Zones` capability.
    pub fn zone(mut self, region: &str, failure_domain: &str) -> Self {
        self.inner.zone = Some(Zone {
            region: region.to_string(),
            failure_domain: failure_domain.to_string(),
        });
        self
    }

    pub fn build(self) -> FakeCloud {
        FakeCloud {
            inner: Arc::new(self.inner),
        }
    }
}

impl Inner {
    fn check_failure(&self, key: &str) -> Result<(), CloudError> {
        if self.failing.contains(key) {
            return Err(CloudError::Provider(format!("injected failure for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Instances for Inner {
    async fn node_addresses(&self, name: &str) -> Result<Vec<NodeAddress>, CloudError> {
        self.check_failure(name)?;
        self.addresses
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::Provider(format!("no addresses recorded for node {name}")))
    }

    async fn node_addresses_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Vec<NodeAddress>, CloudError> {
        self.check_failure(provider_id)?;
        self.addresses_by_provider_id
            .get(provider_id)
            .cloned()
            .ok_or_else(|| {
                CloudError::Provider(format!("no addresses recorded for provider ID {provider_id}"))
            })
    }

    async fn instance_type(&self, name: &str) -> Result<String, CloudError> {
        self.check_failure(name)?;
        self.instance_types
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::Provider(format!("no instance type for node {name}")))
    }

    async fn instance_type_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<String, CloudError> {
        self.check_failure(provider_id)?;
        self.instance_types_by_provider_id
            .get(provider_id)
            .cloned()
            .ok_or_else(|| {
                CloudError::Provider(format!("no instance type for provider ID {provider_id}"))
            })
    }

    async fn external_id(&self, name: &str) -> Result<String, CloudError> {
        self.check_failure(name)?;
        self.external_ids
            .get(name)
            .cloned()
            .ok_or(CloudError::InstanceNotFound)
    }
}

#[async_trait]
impl Zones for Inner {
    async fn zone(&self) -> Result<Zone, CloudError> {
        self.zone
            .clone()
            .ok_or_else(|| CloudError::Provider("no zone configured".to_string()))
    }
}

impl CloudProvider for FakeCloud {
    fn instances(&self) -> Option<Arc<dyn Instances>> {
        Some(self.inner.clone())
    }

    fn zones(&self) -> Option<Arc<dyn Zones>> {
        if self.inner.zone.is_some() {
            Some(self.inner.clone())
        } else {
            None
        }
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_id_distinguishes_not_found() {
        let cloud = FakeCloud::builder()
            .instance("node-a", "i-abc123")
            .lookup_failure("node-b")
            .build();
        let instances = cloud.instances().unwrap();

        assert_eq!(instances.external_id("node-a").await.unwrap(), "i-abc123");
        assert_eq!(
            instances.external_id("node-gone").await,
            Err(CloudError::InstanceNotFound)
        );
        assert!(matches!(
            instances.external_id("node-b").await,
            Err(CloudError::Provider(_))
        ));
    }

    #[test]
    fn test_zones_capability_requires_zone() {
        let unzoned = FakeCloud::builder().build();
        assert!(unzoned.zones().is_none());

        let zoned = FakeCloud::builder().zone("us-east1", "us-east1-b").build();
        assert!(zoned.zones().is_some());
        assert_eq!(zoned.provider_name(), "fake");
    }
}
