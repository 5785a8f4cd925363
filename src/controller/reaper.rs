//! Not-found node deletion
//!
//! A node that stops reporting Ready is cross-checked against the cloud
//! inventory. When the provider answers with the distinguished not-found
//! signal the node object is deleted, so the cluster does not retain a
//! machine that will never come back. Any other lookup failure leaves
//! the node untouched; absence of proof of existence is not proof of
//! absence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Event, Node};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, warn};

use super::conditions::{ready_condition, CONDITION_STATUS_TRUE};
use super::nodes::list_nodes;
use super::ControllerState;
use crate::cloud::{CloudError, Instances};
use crate::error::Result;

/// Re-fetch budget while waiting for a node that has not reported any
/// status yet.
const STATUS_FETCH_RETRIES: u32 = 5;
const STATUS_FETCH_DELAY: Duration = Duration::from_millis(20);

const EVENT_REASON_DELETING: &str = "DeletingNode";

/// Run the not-found deletion loop until process shutdown.
pub async fn run_reaper(state: Arc<ControllerState>) {
    let Some(instances) = state.cloud.instances() else {
        error!("cloud provider does not support instances; node monitoring disabled");
        return;
    };

    let api: Api<Node> = Api::all(state.client.clone());
    let mut interval = tokio::time::interval(state.config.node_monitor_period);

    loop {
        interval.tick().await;
        if !state.is_leader.load(Ordering::Relaxed) {
            continue;
        }
        if let Err(e) = reap_missing_nodes(&state, &api, instances.as_ref()).await {
            error!("node monitor pass failed: {e}");
        }
    }
}

/// One full pass: delete every not-Ready node whose backing instance the
/// cloud definitively reports as gone.
pub(crate) async fn reap_missing_nodes(
    state: &ControllerState,
    api: &Api<Node>,
    instances: &dyn Instances,
) -> Result<()> {
    let nodes = list_nodes(api).await?;

    for mut node in nodes {
        let name = node.name_any();

        // An empty status means the kubelet has not reported yet; give it
        // a few short re-fetches before giving up on this node for the tick.
        let mut ready = ready_condition(&node).cloned();
        let mut attempts = 0;
        while ready.is_none() && attempts < STATUS_FETCH_RETRIES {
            match api.get(&name).await {
                Ok(fresh) => {
                    ready = ready_condition(&fresh).cloned();
                    node = fresh;
                }
                Err(e) => {
                    warn!("failed to re-fetch node {name}, probably deleted: {e}");
                    break;
                }
            }
            attempts += 1;
            tokio::time::sleep(STATUS_FETCH_DELAY).await;
        }
        let Some(ready) = ready else {
            warn!("node {name} reported no Ready condition within the retry budget");
            continue;
        };

        if ready.status == CONDITION_STATUS_TRUE {
            continue;
        }

        match instance_gone(instances, &name).await {
            Ok(true) => {
                info!("deleting node {name}: no longer present in cloud provider");
                if let Err(e) = emit_deleting_event(&state.client, &node).await {
                    warn!("failed to record deletion event for node {name}: {e}");
                }
                spawn_node_deletion(state.client.clone(), name);
            }
            Ok(false) => {}
            Err(e) => {
                error!("error getting data for node {name} from cloud: {e}");
            }
        }
    }

    Ok(())
}

/// Whether the cloud definitively reports the backing instance as gone.
///
/// Only [`CloudError::InstanceNotFound`] authorizes deletion; any other
/// failure is propagated as inconclusive.
pub async fn instance_gone(instances: &dyn Instances, name: &str) -> Result<bool> {
    match instances.external_id(name).await {
        Ok(_) => Ok(false),
        Err(CloudError::InstanceNotFound) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Dispatch the delete on its own task so a slow or failing deletion
/// cannot stall existence checks for the rest of the tick.
fn spawn_node_deletion(client: Client, name: String) {
    tokio::spawn(async move {
        let api: Api<Node> = Api::all(client);
        if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
            error!("unable to delete node {name}: {e}");
        }
    });
}

/// Record the informational deletion event against the node.
async fn emit_deleting_event(client: &Client, node: &Node) -> Result<()> {
    let events: Api<Event> = Api::namespaced(client.clone(), "default");

    let time = chrono::Utc::now();
    let event = Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-event-", node.name_any())),
            ..Default::default()
        },
        type_: Some("Normal".to_string()),
        reason: Some(EVENT_REASON_DELETING.to_string()),
        message: Some(format!(
            "Deleting node {} because it is not present according to the cloud provider",
            node.name_any()
        )),
        involved_object: node.object_ref(&()),
        first_timestamp: Some(Time(time)),
        last_timestamp: Some(Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events.create(&PostParams::default(), &event).await?;
    Ok(())
}
