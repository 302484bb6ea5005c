//! Derivation of per-node configs from a Topology spec.
//!
//! Everything downstream (deployment render, connectivity render, the
//! launcher) works from these flat records. Links are keyed entirely by
//! `(node name, link index)` -- a node's endpoint list carries the peer's
//! name and interface as plain strings, never a reference back into the
//! topology, so there is nothing cyclic to chase.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::crd::{NodeDefinition, Topology};
use crate::util::hash::hash_object;
use crate::util::kubernetes::enforce_dns_label_convention;
use crate::{Error, Result};

/// One node's endpoint of a topology link.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkEndpoint {
    /// Position of the link in the topology's link list; stable identifier
    /// for VNIs and attachment names.
    pub link_index: usize,
    pub local_interface: String,
    pub peer_node: String,
    pub peer_interface: String,
}

/// The flattened, validated view of one node that gets written into the
/// topology ConfigMap and mounted into the node pod.
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub name: String,
    pub kind: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    pub cmd: Option<String>,
    pub entrypoint: Option<String>,
    pub startup_config: Option<String>,
    /// Ordered by link index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkEndpoint>,
}

fn parse_endpoint(raw: &str, link_index: usize) -> Result<(String, String)> {
    let raw = raw.trim();
    let Some((node, iface)) = raw.split_once(':') else {
        return Err(Error::ValidationError(format!(
            "link {link_index}: endpoint {raw:?} is not of the form node:interface"
        )));
    };

    let node = node.trim();
    let iface = iface.trim();
    if node.is_empty() || iface.is_empty() {
        return Err(Error::ValidationError(format!(
            "link {link_index}: endpoint {raw:?} has an empty node or interface"
        )));
    }

    Ok((node.to_string(), iface.to_string()))
}

/// Validate the topology and derive the per-node configs.
pub fn resolve_node_configs(topology: &Topology) -> Result<BTreeMap<String, NodeConfig>> {
    let spec = &topology.spec;

    if spec.nodes.is_empty() {
        return Err(Error::ValidationError(
            "topology declares no nodes".to_string(),
        ));
    }

    let mut configs: BTreeMap<String, NodeConfig> = BTreeMap::new();

    for (name, def) in &spec.nodes {
        if enforce_dns_label_convention(name) != *name {
            return Err(Error::ValidationError(format!(
                "node name {name:?} is not a valid DNS label"
            )));
        }

        if def.image.trim().is_empty() {
            return Err(Error::ValidationError(format!(
                "node {name:?} has no image"
            )));
        }

        configs.insert(name.clone(), node_config_base(name, def));
    }

    let mut used_interfaces: BTreeSet<(String, String)> = BTreeSet::new();

    for (link_index, link) in spec.links.iter().enumerate() {
        if link.endpoints.len() != 2 {
            return Err(Error::ValidationError(format!(
                "link {link_index}: expected exactly two endpoints, got {}",
                link.endpoints.len()
            )));
        }

        let (node_a, if_a) = parse_endpoint(&link.endpoints[0], link_index)?;
        let (node_b, if_b) = parse_endpoint(&link.endpoints[1], link_index)?;

        if node_a == node_b && if_a == if_b {
            return Err(Error::ValidationError(format!(
                "link {link_index}: both endpoints are {node_a}:{if_a}"
            )));
        }

        for (node, iface) in [(&node_a, &if_a), (&node_b, &if_b)] {
            if !spec.nodes.contains_key(node) {
                return Err(Error::ValidationError(format!(
                    "link {link_index}: endpoint references unknown node {node:?}"
                )));
            }

            if !used_interfaces.insert((node.clone(), iface.clone())) {
                return Err(Error::ValidationError(format!(
                    "interface {node}:{iface} appears on more than one link"
                )));
            }
        }

        configs
            .get_mut(&node_a)
            .expect("validated above")
            .links
            .push(LinkEndpoint {
                link_index,
                local_interface: if_a.clone(),
                peer_node: node_b.clone(),
                peer_interface: if_b.clone(),
            });
        configs
            .get_mut(&node_b)
            .expect("validated above")
            .links
            .push(LinkEndpoint {
                link_index,
                local_interface: if_b,
                peer_node: node_a,
                peer_interface: if_a,
            });
    }

    Ok(configs)
}

fn node_config_base(name: &str, def: &NodeDefinition) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        kind: def.kind.trim().to_lowercase(),
        image: def.image.trim().to_string(),
        env: def.env.clone(),
        binds: def.binds.clone(),
        cmd: def.cmd.clone(),
        entrypoint: def.entrypoint.clone(),
        startup_config: def.startup_config.clone(),
        links: Vec::new(),
    }
}

/// Fingerprint of the resolved configs; the restart gate.
pub fn config_hash(configs: &BTreeMap<String, NodeConfig>) -> Result<String> {
    Ok(hash_object(configs)?.1)
}

/// Serialize the configs the way they are stored in status / the ConfigMap.
pub fn config_yaml(config: &NodeConfig) -> Result<String> {
    serde_yaml::to_string(config).map_err(Error::YamlError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LinkDefinition, TopologySpec};

    fn two_node_topology() -> Topology {
        let mut spec = TopologySpec::default();
        spec.nodes.insert(
            "l1".into(),
            NodeDefinition {
                kind: "ceos".into(),
                image: "ceos:4.32".into(),
                ..NodeDefinition::default()
            },
        );
        spec.nodes.insert(
            "l2".into(),
            NodeDefinition {
                kind: "ceos".into(),
                image: "ceos:4.32".into(),
                ..NodeDefinition::default()
            },
        );
        spec.links.push(LinkDefinition {
            endpoints: vec!["l1:eth1".into(), "l2:eth1".into()],
        });
        Topology::new("t1", spec)
    }

    #[test]
    fn resolve_mirrors_links_on_both_endpoints() {
        let configs = resolve_node_configs(&two_node_topology()).unwrap();

        let l1 = &configs["l1"];
        assert_eq!(l1.links.len(), 1);
        assert_eq!(l1.links[0].link_index, 0);
        assert_eq!(l1.links[0].local_interface, "eth1");
        assert_eq!(l1.links[0].peer_node, "l2");
        assert_eq!(l1.links[0].peer_interface, "eth1");

        let l2 = &configs["l2"];
        assert_eq!(l2.links[0].peer_node, "l1");
        assert_eq!(l2.links[0].link_index, 0);
    }

    #[test]
    fn resolve_rejects_unknown_endpoint_node() {
        let mut topo = two_node_topology();
        topo.spec.links.push(LinkDefinition {
            endpoints: vec!["l1:eth2".into(), "ghost:eth1".into()],
        });
        assert!(matches!(
            resolve_node_configs(&topo),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn resolve_rejects_reused_interface() {
        let mut topo = two_node_topology();
        topo.spec.links.push(LinkDefinition {
            endpoints: vec!["l1:eth1".into(), "l2:eth2".into()],
        });
        assert!(matches!(
            resolve_node_configs(&topo),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn resolve_rejects_malformed_endpoint() {
        let mut topo = two_node_topology();
        topo.spec.links.push(LinkDefinition {
            endpoints: vec!["l1eth2".into(), "l2:eth2".into()],
        });
        assert!(matches!(
            resolve_node_configs(&topo),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn config_hash_is_stable() {
        let a = resolve_node_configs(&two_node_topology()).unwrap();
        let b = resolve_node_configs(&two_node_topology()).unwrap();
        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn config_hash_tracks_changes() {
        let topo = two_node_topology();
        let a = resolve_node_configs(&topo).unwrap();

        let mut changed = topo.clone();
        changed.spec.nodes.get_mut("l1").unwrap().env.insert(
            "FOO".into(),
            "bar".into(),
        );
        let b = resolve_node_configs(&changed).unwrap();
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }
}
