//! First-contact node enrichment
//!
//! Nodes register gated behind a cloud taint that keeps the scheduler
//! away from them. This actor observes node-added events, resolves the
//! node's cloud identity, writes instance metadata onto the object, and
//! lifts the taint. It is safe under duplicate deliveries and under
//! concurrent operator replicas; every write is revision-conditioned.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::ResourceExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::conditions::no_route_created_condition;
use super::nodes::apply_node_changes;
use super::retry::retry_on_conflict;
use super::taints::{find_taint, node_without_taint, taints_from_annotations};
use super::{
    ControllerState, LABEL_INSTANCE_TYPE, LABEL_ZONE_FAILURE_DOMAIN, LABEL_ZONE_REGION,
};
use crate::cloud::{resolve_node_addresses, Zone};
use crate::error::{Error, Result};

/// How many node-added observations may queue up before the watcher
/// backpressures.
const EVENT_QUEUE_DEPTH: usize = 128;

/// A node-added observation. Carries identity only; the initializer
/// re-fetches the object before every mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAdded {
    pub name: String,
}

/// Create the bounded channel connecting the watcher to the initializer.
pub fn event_channel() -> (mpsc::Sender<NodeAdded>, mpsc::Receiver<NodeAdded>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Watch the node inventory and forward every applied object as a
/// [`NodeAdded`] observation.
///
/// The underlying watch re-lists on restart, so the same node may be
/// delivered many times over its life; the initializer tolerates that.
pub async fn watch_nodes(api: Api<Node>, tx: mpsc::Sender<NodeAdded>) {
    let mut stream = watcher(api, watcher::Config::default())
        .applied_objects()
        .boxed();

    loop {
        match stream.try_next().await {
            Ok(Some(node)) => {
                let added = NodeAdded {
                    name: node.name_any(),
                };
                if tx.send(added).await.is_err() {
                    // receiver dropped, we are shutting down
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => warn!("node watch error: {e}"),
        }
    }
}

/// Consume node-added observations and initialize each node in turn.
pub async fn run_initializer(state: Arc<ControllerState>, mut rx: mpsc::Receiver<NodeAdded>) {
    while let Some(added) = rx.recv().await {
        if let Err(e) = initialize_node(&state, &added.name).await {
            error!("initialization of node {} failed: {e}", added.name);
        }
    }
}

/// Enrich a gated node with cloud metadata and lift the gating taint.
///
/// Nodes registered without the gating taint are left untouched. The
/// taint is only ever removed after a non-empty providerID has been
/// fetched from the current node snapshot.
pub async fn initialize_node(state: &ControllerState, name: &str) -> Result<()> {
    let Some(instances) = state.cloud.instances() else {
        return Err(Error::ConfigError(
            "cloud provider does not support instances".to_string(),
        ));
    };

    let api: Api<Node> = Api::all(state.client.clone());
    let node = api.get(name).await?;

    let taints = match taints_from_annotations(&node) {
        Ok(taints) => taints,
        Err(e) => {
            // malformed taint metadata is not actionable here
            warn!("skipping initialization: {e}");
            return Ok(());
        }
    };
    if find_taint(&taints, &state.config.cloud_taint_key).is_none() {
        debug!("node {name} is registered without the cloud taint, nothing to initialize");
        return Ok(());
    }

    retry_on_conflict(&state.config.update_backoff, || async {
        let current = api.get(name).await?;

        let provider_id = current
            .spec
            .as_ref()
            .and_then(|s| s.provider_id.clone())
            .unwrap_or_default();
        if provider_id.is_empty() {
            return Err(Error::MissingProviderId(name.to_string()));
        }

        // An operator-supplied IP must be visible in the cloud before the
        // taint comes off; until then the node is simply not ready yet.
        if let Some(ip) = current.labels().get(&state.config.provided_ip_label) {
            let addresses = match resolve_node_addresses(instances.as_ref(), &current).await {
                Ok(addresses) => addresses,
                Err(e) => {
                    error!("failed to get addresses for node {name} from cloud provider: {e}");
                    return Ok(());
                }
            };
            if !addresses.iter().any(|a| &a.address == ip) {
                error!("no cloud address for node {name} matches the provided IP {ip}");
                return Ok(());
            }
        }

        let instance_type = match instances.instance_type_by_provider_id(&provider_id).await {
            Ok(instance_type) => instance_type,
            Err(_) => instances.instance_type(name).await?,
        };

        let zone = match state.cloud.zones() {
            Some(zones) => Some(zones.zone().await?),
            None => None,
        };

        let updated = enriched_node(
            &current,
            &instance_type,
            zone.as_ref(),
            state.config.deferred_routes,
            &state.config.cloud_taint_key,
        )?;

        apply_node_changes(&api, &current, &updated).await?;
        info!("initialized node {name} with cloud metadata");
        Ok(())
    })
    .await
}

/// Build the initialized node snapshot: instance-type and zone labels
/// set when known, the network-unavailable condition appended for
/// route-deferring providers, and the gating taint removed.
pub fn enriched_node(
    current: &Node,
    instance_type: &str,
    zone: Option<&Zone>,
    deferred_routes: bool,
    taint_key: &str,
) -> Result<Node> {
    let mut updated = current.clone();
    let name = current.name_any();

    if !instance_type.is_empty() {
        info!("adding label {LABEL_INSTANCE_TYPE}={instance_type} to node {name}");
        updated
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(LABEL_INSTANCE_TYPE.to_string(), instance_type.to_string());
    }

    if deferred_routes {
        updated
            .status
            .get_or_insert_with(Default::default)
            .conditions
            .get_or_insert_with(Default::default)
            .push(no_route_created_condition());
    }

    if let Some(zone) = zone {
        if !zone.failure_domain.is_empty() {
            info!(
                "adding label {LABEL_ZONE_FAILURE_DOMAIN}={} to node {name}",
                zone.failure_domain
            );
            updated
                .metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(
                    LABEL_ZONE_FAILURE_DOMAIN.to_string(),
                    zone.failure_domain.clone(),
                );
        }
        if !zone.region.is_empty() {
            info!("adding label {LABEL_ZONE_REGION}={} to node {name}", zone.region);
            updated
                .metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(LABEL_ZONE_REGION.to_string(), zone.region.clone());
        }
    }

    node_without_taint(&updated, taint_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::conditions::{
        find_condition, CONDITION_TYPE_NETWORK_UNAVAILABLE,
    };
    use crate::controller::taints::{has_taint, TAINTS_ANNOTATION};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const TAINT_KEY: &str = "ExternalCloudProvider";

    fn gated_node() -> Node {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            TAINTS_ANNOTATION.to_string(),
            format!(r#"[{{"key":"{TAINT_KEY}","effect":"NoSchedule"}}]"#),
        );
        Node {
            metadata: ObjectMeta {
                name: Some("node-a".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_enrichment_removes_taint_and_sets_labels() {
        let zone = Zone {
            region: "us-east1".to_string(),
            failure_domain: "us-east1-b".to_string(),
        };
        let updated = enriched_node(&gated_node(), "n1-standard-2", Some(&zone), false, TAINT_KEY)
            .unwrap();

        assert!(!has_taint(&updated, TAINT_KEY).unwrap());
        let labels = updated.metadata.labels.unwrap();
        assert_eq!(labels.get(LABEL_INSTANCE_TYPE).unwrap(), "n1-standard-2");
        assert_eq!(labels.get(LABEL_ZONE_REGION).unwrap(), "us-east1");
        assert_eq!(labels.get(LABEL_ZONE_FAILURE_DOMAIN).unwrap(), "us-east1-b");
    }

    #[test]
    fn test_enrichment_skips_empty_metadata() {
        let empty_zone = Zone::default();
        let updated =
            enriched_node(&gated_node(), "", Some(&empty_zone), false, TAINT_KEY).unwrap();

        assert!(!has_taint(&updated, TAINT_KEY).unwrap());
        assert!(updated.metadata.labels.is_none());
        assert!(updated.status.is_none());
    }

    #[test]
    fn test_deferred_routes_appends_network_unavailable() {
        let updated = enriched_node(&gated_node(), "", None, true, TAINT_KEY).unwrap();
        assert!(find_condition(&updated, CONDITION_TYPE_NETWORK_UNAVAILABLE).is_some());
    }

    #[test]
    fn test_enrichment_preserves_foreign_taints() {
        let mut node = gated_node();
        node.metadata.annotations.as_mut().unwrap().insert(
            TAINTS_ANNOTATION.to_string(),
            format!(
                r#"[{{"key":"{TAINT_KEY}","effect":"NoSchedule"}},
                    {{"key":"dedicated","value":"gpu","effect":"NoSchedule"}}]"#
            ),
        );

        let updated = enriched_node(&node, "", None, false, TAINT_KEY).unwrap();
        assert!(!has_taint(&updated, TAINT_KEY).unwrap());
        assert!(has_taint(&updated, "dedicated").unwrap());
    }
}
