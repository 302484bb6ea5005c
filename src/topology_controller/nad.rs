//! NetworkAttachmentDefinition rendering for multus connectivity.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use serde_json::json;

use crate::constants;
use crate::crd::{ResolvedConfig, Topology};
use crate::{Error, Result};

use super::topology_labels;

/// The meta-CNI's attachment CRD is not part of our API group; it is handled
/// dynamically.
pub fn nad_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "k8s.cni.cncf.io",
        "v1",
        "NetworkAttachmentDefinition",
    ))
}

/// One attachment per link index: `<topology>-l<index>`.
pub fn nad_names(topology: &Topology) -> Vec<String> {
    (0..topology.spec.links.len())
        .map(|idx| format!("{}-l{}", topology.name_any(), idx))
        .collect()
}

/// Render the attachment for one link. The CNI config is a fixed netkit
/// point-to-point descriptor; the attachment name ties it to the link index.
pub fn render_nad(
    topology: &Topology,
    nad_name: &str,
    resolved: &ResolvedConfig,
) -> Result<DynamicObject> {
    let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
        Error::OtherError("topology has no uid; cannot create owner reference".to_string())
    })?;

    let config = json!({
        "cniVersion": "0.3.1",
        "name": nad_name,
        "type": "netkit",
        "mode": "ptp",
    });
    let config_raw = serde_json::to_string(&config).map_err(Error::SerializationError)?;

    let mut labels = topology_labels(topology);
    labels.insert(
        constants::LABEL_NAME.to_string(),
        nad_name.to_string(),
    );
    labels.insert(
        constants::LABEL_TOPOLOGY_KIND.to_string(),
        "topology".to_string(),
    );
    labels.extend(resolved.labels.clone());

    let mut nad = DynamicObject::new(nad_name, &nad_api_resource());
    nad.metadata.namespace = topology.namespace();
    nad.metadata.owner_references = Some(vec![oref]);
    nad.metadata.labels = Some(labels);
    if !resolved.annotations.is_empty() {
        nad.metadata.annotations = Some(resolved.annotations.clone());
    }
    nad.data = json!({
        "spec": {
            "config": config_raw,
        }
    });

    Ok(nad)
}

/// Config string and ownership are the diff-relevant attachment fields.
pub fn nad_conforms(
    existing: &DynamicObject,
    rendered: &DynamicObject,
    expected_owner_uid: &str,
) -> bool {
    let existing_config = existing.data["spec"]["config"].as_str().unwrap_or_default();
    let rendered_config = rendered.data["spec"]["config"].as_str().unwrap_or_default();
    if existing_config != rendered_config {
        return false;
    }

    if !crate::util::kubernetes::map_contains_all_expected(
        existing.metadata.labels.as_ref(),
        rendered.metadata.labels.as_ref(),
    ) {
        return false;
    }

    if !crate::util::kubernetes::map_contains_all_expected(
        existing.metadata.annotations.as_ref(),
        rendered.metadata.annotations.as_ref(),
    ) {
        return false;
    }

    let owner_refs = existing.owner_references();
    owner_refs.len() == 1 && owner_refs[0].uid == expected_owner_uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LinkDefinition, NodeDefinition, TopologySpec};

    fn topology() -> Topology {
        let mut spec = TopologySpec::default();
        spec.nodes.insert(
            "l1".into(),
            NodeDefinition {
                kind: "linux".into(),
                image: "alpine:3".into(),
                ..NodeDefinition::default()
            },
        );
        spec.nodes.insert(
            "l2".into(),
            NodeDefinition {
                kind: "linux".into(),
                image: "alpine:3".into(),
                ..NodeDefinition::default()
            },
        );
        for _ in 0..3 {
            spec.links.push(LinkDefinition {
                endpoints: vec![String::new(), String::new()],
            });
        }
        let mut topo = Topology::new("t1", spec);
        topo.metadata.namespace = Some("ns".into());
        topo.metadata.uid = Some("uid".into());
        topo
    }

    #[test]
    fn names_follow_link_indices() {
        assert_eq!(nad_names(&topology()), vec!["t1-l0", "t1-l1", "t1-l2"]);
    }

    #[test]
    fn rendered_config_is_netkit_ptp() {
        let topo = topology();
        let resolved = ResolvedConfig::default();
        let nad = render_nad(&topo, "t1-l0", &resolved).unwrap();

        let config = nad.data["spec"]["config"].as_str().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(config).unwrap();
        assert_eq!(parsed["cniVersion"], "0.3.1");
        assert_eq!(parsed["type"], "netkit");
        assert_eq!(parsed["mode"], "ptp");
        assert_eq!(parsed["name"], "t1-l0");
    }

    #[test]
    fn conforms_checks_config_and_owner() {
        let topo = topology();
        let resolved = ResolvedConfig::default();
        let rendered = render_nad(&topo, "t1-l0", &resolved).unwrap();

        let existing = rendered.clone();
        assert!(nad_conforms(&existing, &rendered, "uid"));
        assert!(!nad_conforms(&existing, &rendered, "other"));

        let mut drifted = rendered.clone();
        drifted.data["spec"]["config"] = serde_json::Value::String("{}".into());
        assert!(!nad_conforms(&drifted, &rendered, "uid"));
    }
}
