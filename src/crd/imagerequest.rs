use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// ImageRequest asks the controller to arrange a node image pull on the
/// cluster node a launcher pod landed on (the pull-through path). The
/// launcher creates these; the controller cache watches them.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "skyforge.dev",
    version = "v1alpha1",
    kind = "ImageRequest",
    derive = "Default",
    namespaced,
    status = "ImageRequestStatus",
    doc = "ImageRequest tracks a node image pull requested by an in-pod launcher"
)]
pub struct ImageRequestSpec {
    pub topology_name: String,
    pub topology_node_name: String,
    pub requested_image: String,
    /// Cluster node the requesting pod is scheduled on.
    pub kubernetes_node: String,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequestStatus {
    pub accepted: Option<bool>,
    pub complete: Option<bool>,
}
