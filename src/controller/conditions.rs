//! Node condition helpers following Kubernetes API conventions

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Condition types this operator reads or writes
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_NETWORK_UNAVAILABLE: &str = "NetworkUnavailable";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";

/// Find a status condition by type.
pub fn find_condition<'a>(node: &'a Node, type_: &str) -> Option<&'a NodeCondition> {
    node.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_)
}

/// The node's Ready condition, if the kubelet has reported one yet.
pub fn ready_condition(node: &Node) -> Option<&NodeCondition> {
    find_condition(node, CONDITION_TYPE_READY)
}

/// Condition marking a node unusable for traffic until the cloud
/// provider has programmed a route for it.
pub fn no_route_created_condition() -> NodeCondition {
    NodeCondition {
        type_: CONDITION_TYPE_NETWORK_UNAVAILABLE.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        reason: Some("NoRouteCreated".to_string()),
        message: Some("Node created without a route".to_string()),
        last_transition_time: Some(Time(Utc::now())),
        last_heartbeat_time: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::NodeStatus;

    fn node_with_conditions(conditions: Vec<NodeCondition>) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_ready_condition_absent_without_status() {
        assert!(ready_condition(&Node::default()).is_none());
        assert!(ready_condition(&node_with_conditions(vec![])).is_none());
    }

    #[test]
    fn test_find_condition_by_type() {
        let node = node_with_conditions(vec![
            NodeCondition {
                type_: CONDITION_TYPE_READY.to_string(),
                status: "False".to_string(),
                ..Default::default()
            },
            no_route_created_condition(),
        ]);

        assert_eq!(ready_condition(&node).unwrap().status, "False");
        let network = find_condition(&node, CONDITION_TYPE_NETWORK_UNAVAILABLE).unwrap();
        assert_eq!(network.status, CONDITION_STATUS_TRUE);
        assert_eq!(network.reason.as_deref(), Some("NoRouteCreated"));
    }
}
