//! The per-topology ConfigMap: node config YAML plus files-from-URL lists.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::{ResolvedConfig, Topology};
use crate::{Error, Result};

use super::configs::{config_yaml, NodeConfig};
use super::topology_labels;

/// Render the topology ConfigMap. One `<node>` key per node holding its
/// NodeConfig YAML (mounted as the launcher's topology file), and one
/// `<node>-files-from-url` key holding that node's URL file list (always
/// present, possibly an empty list, because the launcher mounts the key
/// unconditionally).
pub fn render_config_map(
    topology: &Topology,
    configs: &BTreeMap<String, NodeConfig>,
    resolved: &ResolvedConfig,
) -> Result<ConfigMap> {
    let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
        Error::OtherError("topology has no uid; cannot create owner reference".to_string())
    })?;

    let mut data = BTreeMap::new();

    for (node_name, node_config) in configs {
        data.insert(node_name.clone(), config_yaml(node_config)?);

        let files = topology
            .spec
            .deployment
            .files_from_url
            .get(node_name)
            .cloned()
            .unwrap_or_default();
        data.insert(
            format!("{node_name}-files-from-url"),
            serde_yaml::to_string(&files).map_err(Error::YamlError)?,
        );
    }

    let mut labels = topology_labels(topology);
    labels.extend(resolved.labels.clone());

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(topology.name_any()),
            namespace: topology.namespace(),
            owner_references: Some(vec![oref]),
            labels: Some(labels),
            annotations: if resolved.annotations.is_empty() {
                None
            } else {
                Some(resolved.annotations.clone())
            },
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    })
}

pub fn config_map_conforms(
    existing: &ConfigMap,
    rendered: &ConfigMap,
    expected_owner_uid: &str,
) -> bool {
    if existing.data != rendered.data {
        return false;
    }

    let owner_refs = existing.owner_references();
    owner_refs.len() == 1 && owner_refs[0].uid == expected_owner_uid
}
