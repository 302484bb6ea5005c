//! Rendering of the Connectivity record from the resolved node configs.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::constants::VXLAN_VNI_BASE;
use crate::crd::{Connectivity, ConnectivitySpec, PointToPointTunnel, ResolvedConfig, Topology};
use crate::topology_controller::configs::NodeConfig;
use crate::topology_controller::topology_labels;
use crate::{Error, Result};

/// VNI for a link index. Topology-scoped; stable for the life of the link.
pub fn link_vni(link_index: usize) -> i64 {
    VXLAN_VNI_BASE + link_index as i64
}

/// DNS destination for a node's fabric service, `<service>.<namespace>`.
///
/// The short form suffices: the launcher may later substitute a concrete
/// IP, and the cluster resolver expands the search path either way.
pub fn node_destination(topology: &Topology, node_name: &str) -> String {
    format!(
        "{}.{}",
        topology.node_object_name(node_name),
        topology.namespace().unwrap_or_default()
    )
}

/// Build the per-node tunnel lists. Each topology link lands exactly once in
/// both endpoints' lists, with the same VNI on both sides.
pub fn render_tunnels(
    topology: &Topology,
    configs: &BTreeMap<String, NodeConfig>,
) -> BTreeMap<String, Vec<PointToPointTunnel>> {
    let mut tunnels: BTreeMap<String, Vec<PointToPointTunnel>> = BTreeMap::new();

    for (node_name, config) in configs {
        let node_tunnels = tunnels.entry(node_name.clone()).or_default();

        for endpoint in &config.links {
            node_tunnels.push(PointToPointTunnel {
                local_node: node_name.clone(),
                local_interface: endpoint.local_interface.clone(),
                remote_node: endpoint.peer_node.clone(),
                remote_interface: endpoint.peer_interface.clone(),
                destination: node_destination(topology, &endpoint.peer_node),
                tunnel_id: link_vni(endpoint.link_index),
            });
        }
    }

    tunnels
}

/// Render the owned Connectivity object for the topology.
pub fn render_connectivity(
    topology: &Topology,
    configs: &BTreeMap<String, NodeConfig>,
    resolved: &ResolvedConfig,
) -> Result<Connectivity> {
    let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
        Error::OtherError("topology has no uid; cannot create owner reference".to_string())
    })?;

    let mut labels = topology_labels(topology);
    labels.extend(resolved.labels.clone());

    let mut connectivity = Connectivity::new(
        &topology.name_any(),
        ConnectivitySpec {
            point_to_point_tunnels: render_tunnels(topology, configs),
        },
    );
    connectivity.metadata = ObjectMeta {
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
    };

    Ok(connectivity)
}

/// True iff the existing Connectivity matches the rendered one where it
/// matters: the tunnel map and the owner.
pub fn connectivity_conforms(
    existing: &Connectivity,
    rendered: &Connectivity,
    expected_owner_uid: &str,
) -> bool {
    if existing.spec != rendered.spec {
        return false;
    }

    let owner_refs = existing.owner_references();
    owner_refs.len() == 1 && owner_refs[0].uid == expected_owner_uid
}
