//! Taint/annotation codec
//!
//! Node taints are persisted as a JSON array under a well-known
//! annotation. These are pure helpers to decode that annotation and to
//! derive a node snapshot with a given taint key removed; nothing here
//! talks to the API server.

use k8s_openapi::api::core::v1::{Node, Taint};
use kube::ResourceExt;

use crate::error::{Error, Result};

/// Annotation under which node taints are stored.
pub const TAINTS_ANNOTATION: &str = "scheduler.alpha.kubernetes.io/taints";

/// Decode the taints recorded in the node's annotations.
///
/// A node without the annotation simply has no taints.
pub fn taints_from_annotations(node: &Node) -> Result<Vec<Taint>> {
    let Some(raw) = node.annotations().get(TAINTS_ANNOTATION) else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw).map_err(|e| Error::TaintDecode {
        node: node.name_any(),
        reason: e.to_string(),
    })
}

/// Find a taint by key.
pub fn find_taint<'a>(taints: &'a [Taint], key: &str) -> Option<&'a Taint> {
    taints.iter().find(|t| t.key == key)
}

/// True when the node still carries a taint under `key`.
pub fn has_taint(node: &Node, key: &str) -> Result<bool> {
    Ok(find_taint(&taints_from_annotations(node)?, key).is_some())
}

/// Compute a copy of the node with every taint under `key` removed.
///
/// The annotation itself is dropped once no taints remain.
pub fn node_without_taint(node: &Node, key: &str) -> Result<Node> {
    let remaining: Vec<Taint> = taints_from_annotations(node)?
        .into_iter()
        .filter(|t| t.key != key)
        .collect();

    let mut updated = node.clone();
    let annotations = updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    if remaining.is_empty() {
        annotations.remove(TAINTS_ANNOTATION);
    } else {
        annotations.insert(
            TAINTS_ANNOTATION.to_string(),
            serde_json::to_string(&remaining)?,
        );
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn node_with_taint_annotation(raw: &str) -> Node {
        let mut annotations = BTreeMap::new();
        annotations.insert(TAINTS_ANNOTATION.to_string(), raw.to_string());
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
    fn test_decode_missing_annotation_is_empty() {
        let node = Node::default();
        assert!(taints_from_annotations(&node).unwrap().is_empty());
    }

    #[test]
    fn test_decode_taints() {
        let node = node_with_taint_annotation(
            r#"[{"key":"ExternalCloudProvider","effect":"NoSchedule"},
                {"key":"other","value":"x","effect":"NoExecute"}]"#,
        );
        let taints = taints_from_annotations(&node).unwrap();
        assert_eq!(taints.len(), 2);
        assert!(find_taint(&taints, "ExternalCloudProvider").is_some());
        assert!(find_taint(&taints, "missing").is_none());
        assert!(has_taint(&node, "other").unwrap());
    }

    #[test]
    fn test_decode_malformed_annotation() {
        let node = node_with_taint_annotation("not json");
        let result = taints_from_annotations(&node);
        assert!(matches!(result, Err(Error::TaintDecode { .. })));
    }

    #[test]
    fn test_remove_taint_keeps_others() {
        let node = node_with_taint_annotation(
            r#"[{"key":"ExternalCloudProvider","effect":"NoSchedule"},
                {"key":"other","value":"x","effect":"NoExecute"}]"#,
        );
        let updated = node_without_taint(&node, "ExternalCloudProvider").unwrap();

        let taints = taints_from_annotations(&updated).unwrap();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "other");
        // the input snapshot is untouched
        assert!(has_taint(&node, "ExternalCloudProvider").unwrap());
    }

    #[test]
    fn test_remove_last_taint_drops_annotation() {
        let node = node_with_taint_annotation(
            r#"[{"key":"ExternalCloudProvider","effect":"NoSchedule"}]"#,
        );
        let updated = node_without_taint(&node, "ExternalCloudProvider").unwrap();
        assert!(updated.annotations().get(TAINTS_ANNOTATION).is_none());
    }

    #[test]
    fn test_remove_absent_taint_is_noop_on_taints() {
        let node = node_with_taint_annotation(r#"[{"key":"other","effect":"NoSchedule"}]"#);
        let updated = node_without_taint(&node, "ExternalCloudProvider").unwrap();
        let taints = taints_from_annotations(&updated).unwrap();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "other");
    }
}
