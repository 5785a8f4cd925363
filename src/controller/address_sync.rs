//! Periodic address reconciliation
//!
//! Cloud-side addresses drift after registration (re-IP, provider-side
//! renumbering), so each tick recomputes every node's address list from
//! the provider's current view and writes it back when it changed.
//! Gated nodes are skipped until the initializer has released them.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, NodeAddress};
use kube::api::Api;
use kube::ResourceExt;
use tracing::{debug, error};

use super::nodes::{list_nodes, update_node_status};
use super::taints::{find_taint, taints_from_annotations};
use super::ControllerState;
use crate::cloud::{resolve_node_addresses, Instances};
use crate::error::{Error, Result};

const ADDRESS_TYPE_HOSTNAME: &str = "Hostname";

/// Run the address reconciliation loop until process shutdown.
pub async fn run_address_sync(state: Arc<ControllerState>) {
    let Some(instances) = state.cloud.instances() else {
        error!("cloud provider does not support instances; address sync disabled");
        return;
    };

    let api: Api<Node> = Api::all(state.client.clone());
    let mut interval = tokio::time::interval(state.config.address_sync_period);

    loop {
        interval.tick().await;
        if !state.is_leader.load(Ordering::Relaxed) {
            continue;
        }
        if let Err(e) = sync_node_addresses(&state, &api, instances.as_ref()).await {
            error!("address sync pass failed: {e}");
        }
    }
}

/// One full pass over the node inventory.
///
/// Per-node failures are logged and never abort the pass for the
/// remaining nodes.
pub(crate) async fn sync_node_addresses(
    state: &ControllerState,
    api: &Api<Node>,
    instances: &dyn Instances,
) -> Result<()> {
    let nodes = list_nodes(api).await?;

    for node in &nodes {
        let name = node.name_any();

        match taints_from_annotations(node) {
            Ok(taints) => {
                if find_taint(&taints, &state.config.cloud_taint_key).is_some() {
                    debug!("node {name} is still tainted, skipping address sync");
                    continue;
                }
            }
            Err(e) => {
                error!("{e}");
                continue;
            }
        }

        let cloud_addresses = match resolve_node_addresses(instances, node).await {
            Ok(addresses) => addresses,
            Err(e) => {
                error!("failed to get addresses for node {name} from cloud provider: {e}");
                continue;
            }
        };

        let provided_ip = node.labels().get(&state.config.provided_ip_label).cloned();
        let reconciled = match reconcile_addresses(node, cloud_addresses, provided_ip.as_deref()) {
            Ok(Some(addresses)) => addresses,
            Ok(None) => continue,
            Err(e) => {
                error!("{e}");
                continue;
            }
        };

        let mut updated = node.clone();
        updated
            .status
            .get_or_insert_with(Default::default)
            .addresses = Some(reconciled);
        if let Err(e) = update_node_status(api, &updated).await {
            error!("failed to update addresses of node {name}: {e}");
        }
    }

    Ok(())
}

/// Compute the address list to store for `node`, or `None` when the
/// stored list already matches the cloud's view.
///
/// A user-provided IP pins the list to the single cloud entry with that
/// exact value, type preserved; a missing match is an error and the
/// stored list stays as it is. A Hostname entry absent from the cloud
/// view is carried forward from the stored status, since the cloud is
/// not authoritative for hostnames.
pub fn reconcile_addresses(
    node: &Node,
    mut cloud_addresses: Vec<NodeAddress>,
    provided_ip: Option<&str>,
) -> Result<Option<Vec<NodeAddress>>> {
    let stored = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_deref())
        .unwrap_or_default();

    let cloud_has_hostname = cloud_addresses
        .iter()
        .any(|a| a.type_ == ADDRESS_TYPE_HOSTNAME);
    let stored_hostname = if cloud_has_hostname {
        None
    } else {
        stored
            .iter()
            .find(|a| a.type_ == ADDRESS_TYPE_HOSTNAME)
            .cloned()
    };

    if let Some(ip) = provided_ip {
        let Some(matched) = cloud_addresses.iter().find(|a| a.address == ip) else {
            return Err(Error::ProvidedIpNotFound {
                node: node.name_any(),
                ip: ip.to_string(),
            });
        };
        cloud_addresses = vec![matched.clone()];
    }

    if let Some(hostname) = stored_hostname {
        cloud_addresses.push(hostname);
    }

    if stored == cloud_addresses.as_slice() {
        return Ok(None);
    }
    Ok(Some(cloud_addresses))
}
