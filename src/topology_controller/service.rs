//! Per-node fabric Services: the DNS targets tunnels dial.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::constants;
use crate::crd::{ConnectivityKind, ResolvedConfig, Topology};
use crate::{Error, Result};

/// Render the fabric service for one node. Its cluster DNS name is the
/// `destination` carried in the Connectivity record for peers of this node.
pub fn render_fabric_service(
    topology: &Topology,
    node_name: &str,
    resolved: &ResolvedConfig,
) -> Result<Service> {
    let oref = topology.controller_owner_ref(&()).ok_or_else(|| {
        Error::OtherError("topology has no uid; cannot create owner reference".to_string())
    })?;

    let name = topology.node_object_name(node_name);

    let selector = BTreeMap::from([
        (
            constants::LABEL_TOPOLOGY_OWNER.to_string(),
            topology.name_any(),
        ),
        (
            constants::LABEL_TOPOLOGY_NODE.to_string(),
            node_name.to_string(),
        ),
    ]);

    let mut labels = selector.clone();
    labels.insert(
        constants::LABEL_APP.to_string(),
        constants::APP_NAME_DEFAULT.to_string(),
    );
    labels.insert(constants::LABEL_NAME.to_string(), name.clone());
    labels.extend(resolved.labels.clone());

    let port = match topology.spec.connectivity {
        ConnectivityKind::Slurpeeth => ServicePort {
            name: Some(constants::CONNECTIVITY_SLURPEETH.to_string()),
            protocol: Some(constants::TCP.to_string()),
            port: constants::SLURPEETH_SERVICE_PORT,
            target_port: Some(IntOrString::Int(constants::SLURPEETH_SERVICE_PORT)),
            ..ServicePort::default()
        },
        _ => ServicePort {
            name: Some(constants::CONNECTIVITY_VXLAN.to_string()),
            protocol: Some(constants::UDP.to_string()),
            port: constants::VXLAN_SERVICE_PORT,
            target_port: Some(IntOrString::Int(constants::VXLAN_SERVICE_PORT)),
            ..ServicePort::default()
        },
    };

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name),
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
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![port]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    })
}

/// Selector, ports, and ownership are the diff-relevant service fields.
pub fn service_conforms(
    existing: &Service,
    rendered: &Service,
    expected_owner_uid: &str,
) -> bool {
    let (Some(existing_spec), Some(rendered_spec)) =
        (existing.spec.as_ref(), rendered.spec.as_ref())
    else {
        return false;
    };

    if existing_spec.selector != rendered_spec.selector {
        return false;
    }

    if existing_spec.ports != rendered_spec.ports {
        return false;
    }

    if !crate::util::kubernetes::map_contains_all_expected(
        existing.metadata.labels.as_ref(),
        rendered.metadata.labels.as_ref(),
    ) {
        return false;
    }

    let owner_refs = existing.owner_references();
    owner_refs.len() == 1 && owner_refs[0].uid == expected_owner_uid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{NodeDefinition, TopologySpec};

    fn topology(connectivity: ConnectivityKind) -> Topology {
        let mut spec = TopologySpec::default();
        spec.connectivity = connectivity;
        spec.nodes.insert(
            "l1".into(),
            NodeDefinition {
                kind: "ceos".into(),
                image: "ceos:4.32".into(),
                ..NodeDefinition::default()
            },
        );
        let mut topo = Topology::new("t1", spec);
        topo.metadata.namespace = Some("ns".into());
        topo.metadata.uid = Some("uid".into());
        topo
    }

    #[test]
    fn vxlan_service_exposes_udp_6784() {
        let topo = topology(ConnectivityKind::Vxlan);
        let resolved = ResolvedConfig::default();
        let svc = render_fabric_service(&topo, "l1", &resolved).unwrap();

        assert_eq!(svc.metadata.name.as_deref(), Some("t1-l1"));
        let ports = svc.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 6784);
        assert_eq!(ports[0].protocol.as_deref(), Some("UDP"));
    }

    #[test]
    fn slurpeeth_service_exposes_tcp_4799() {
        let topo = topology(ConnectivityKind::Slurpeeth);
        let resolved = ResolvedConfig::default();
        let svc = render_fabric_service(&topo, "l1", &resolved).unwrap();

        let ports = svc.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports[0].port, 4799);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn conforms_checks_selector_ports_owner() {
        let topo = topology(ConnectivityKind::Vxlan);
        let resolved = ResolvedConfig::default();
        let rendered = render_fabric_service(&topo, "l1", &resolved).unwrap();

        assert!(service_conforms(&rendered.clone(), &rendered, "uid"));
        assert!(!service_conforms(&rendered.clone(), &rendered, "nope"));

        let mut drifted = rendered.clone();
        drifted.spec.as_mut().unwrap().ports.as_mut().unwrap()[0].port = 9999;
        assert!(!service_conforms(&drifted, &rendered, "uid"));
    }
}
