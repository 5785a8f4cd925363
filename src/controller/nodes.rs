//! Cluster store helpers for Node objects
//!
//! Every write here is conditional: the node carries the resourceVersion
//! it was fetched at, and the API server rejects the write with a 409
//! conflict if the object has moved on. A snapshot without a revision is
//! refused before it reaches the wire.

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::ResourceExt;

use crate::error::{Error, Result};

fn ensure_resource_version(node: &Node) -> Result<()> {
    if node.resource_version().unwrap_or_default().is_empty() {
        return Err(Error::MissingResourceVersion {
            node: node.name_any(),
        });
    }
    Ok(())
}

/// List every node in the cluster.
///
/// The snapshot may be stale; callers are periodic and self-correcting.
pub async fn list_nodes(api: &Api<Node>) -> Result<Vec<Node>> {
    Ok(api.list(&ListParams::default()).await?.items)
}

/// Conditionally update a node's metadata and spec.
pub async fn update_node(api: &Api<Node>, node: &Node) -> Result<Node> {
    ensure_resource_version(node)?;
    Ok(api
        .replace(&node.name_any(), &PostParams::default(), node)
        .await?)
}

/// Conditionally update a node's status subresource.
pub async fn update_node_status(api: &Api<Node>, node: &Node) -> Result<Node> {
    ensure_resource_version(node)?;
    let data = serde_json::to_vec(node)?;
    Ok(api
        .replace_status(&node.name_any(), &PostParams::default(), data)
        .await?)
}

/// Apply the difference between two snapshots of the same node.
///
/// Metadata and spec changes go through the main resource, status changes
/// through the status subresource. The status write carries the revision
/// returned by the first write, so a concurrent writer still surfaces as
/// a conflict rather than being overwritten.
pub async fn apply_node_changes(api: &Api<Node>, old: &Node, new: &Node) -> Result<()> {
    let mut current = new.clone();

    if old.metadata.labels != new.metadata.labels
        || old.metadata.annotations != new.metadata.annotations
        || old.spec != new.spec
    {
        current = update_node(api, &current).await?;
    }

    if old.status != new.status {
        let mut with_status = new.clone();
        with_status.metadata.resource_version = current.metadata.resource_version.clone();
        update_node_status(api, &with_status).await?;
    }

    Ok(())
}
