use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Connectivity is the controller-rendered record of every link endpoint a
/// node must terminate. The in-pod launcher consumes it (or its cached copy)
/// to build the data plane.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "skyforge.dev",
    version = "v1alpha1",
    kind = "Connectivity",
    derive = "Default",
    namespaced,
    doc = "Connectivity lists, per node, the point-to-point tunnels the node pod must terminate"
)]
pub struct ConnectivitySpec {
    /// Node name -> tunnels that node terminates. Every topology link appears
    /// exactly once in each of its two endpoints' lists, with the same
    /// tunnel ID on both sides.
    #[serde(default)]
    pub point_to_point_tunnels: BTreeMap<String, Vec<PointToPointTunnel>>,
}

/// One endpoint's view of an emulated link.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PointToPointTunnel {
    pub local_node: String,
    pub local_interface: String,
    pub remote_node: String,
    pub remote_interface: String,
    /// DNS name (or IP, once the setup step substituted it) of the remote
    /// node's fabric service.
    pub destination: String,
    /// VXLAN network identifier; unique per link within the topology and
    /// stable across reconciles.
    #[serde(rename = "tunnelID")]
    pub tunnel_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_serializes_with_wire_field_names() {
        let tunnel = PointToPointTunnel {
            local_node: "l1".into(),
            local_interface: "eth1".into(),
            remote_node: "l2".into(),
            remote_interface: "eth1".into(),
            destination: "t1-l2.ns".into(),
            tunnel_id: 100,
        };

        let json = serde_json::to_value(&tunnel).unwrap();
        assert_eq!(json["localInterface"], "eth1");
        assert_eq!(json["remoteNode"], "l2");
        assert_eq!(json["tunnelID"], 100);
        assert_eq!(json["destination"], "t1-l2.ns");
    }
}
