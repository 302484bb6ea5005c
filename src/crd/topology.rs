use std::collections::BTreeMap;
use std::fmt;

use crate::conditions::DeriveConditions;
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition as K8sCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub static TOPOLOGY_FINALIZER: &str = "topologies.skyforge.dev/finalizer";

/// How the declared links are emulated between node pods.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityKind {
    /// Per-link VXLAN tunnels over the pod network (UDP 6784).
    #[default]
    Vxlan,
    /// TCP-framed link emulation (port 4799).
    Slurpeeth,
    /// Secondary interfaces wired by the cluster's meta-CNI.
    Multus,
}

impl ConnectivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityKind::Vxlan => crate::constants::CONNECTIVITY_VXLAN,
            ConnectivityKind::Slurpeeth => crate::constants::CONNECTIVITY_SLURPEETH,
            ConnectivityKind::Multus => crate::constants::CONNECTIVITY_MULTUS,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            crate::constants::CONNECTIVITY_VXLAN => Some(ConnectivityKind::Vxlan),
            crate::constants::CONNECTIVITY_SLURPEETH => Some(ConnectivityKind::Slurpeeth),
            crate::constants::CONNECTIVITY_MULTUS => Some(ConnectivityKind::Multus),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "skyforge.dev",
    version = "v1alpha1",
    kind = "Topology",
    derive = "Default",
    namespaced,
    shortname = "topo",
    doc = "Topology describes a virtual NOS lab: nodes, their images and configs, and the point-to-point links between them",
    printcolumn = r#"{"name":"Connectivity","jsonPath":".spec.connectivity","type":"string"}"#,
    printcolumn = r#"{"name":"Hash","jsonPath":".status.configHash","type":"string"}"#,
    status = "TopologyStatus"
)]
pub struct TopologySpec {
    /// Link emulation flavor for the topology.
    #[serde(default)]
    #[schemars(default)]
    pub connectivity: ConnectivityKind,
    /// The NOS nodes of the lab, keyed by node name.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeDefinition>,
    /// Point-to-point links between node interfaces. The position of a link
    /// in this list is its stable link index; reordering links re-keys every
    /// derived identifier, so append rather than reorder.
    #[serde(default)]
    pub links: Vec<LinkDefinition>,
    /// Per-node deployment knobs.
    #[serde(default)]
    pub deployment: DeploymentSettings,
    /// Startup/readiness probe configuration for node pods.
    #[serde(default)]
    pub status_probes: StatusProbes,
    /// Image pull behavior overrides.
    #[serde(default)]
    pub image_pull: ImagePullSettings,
}

/// One NOS node of the lab.
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// NOS kind, e.g. `ceos`, `cisco_iol`, `vr-vmx`, `linux`.
    pub kind: String,
    /// Container image the node boots from.
    pub image: String,
    /// Extra environment passed to the NOS container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Bind mounts, `host:container[:ro]`. Only absolute host paths are
    /// translated in native mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    /// Command override, run via `sh -c`.
    pub cmd: Option<String>,
    /// Entrypoint override, used when `cmd` is absent.
    pub entrypoint: Option<String>,
    /// In-pod path of the startup configuration. The file itself arrives via
    /// `filesFromConfigMap`; kind handlers re-mount it where the NOS expects.
    pub startup_config: Option<String>,
}

/// An unordered pair of node interfaces.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkDefinition {
    /// Exactly two `node:interface` endpoints.
    pub endpoints: Vec<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSettings {
    /// Run the NOS directly as a pod container. Defaults to true; disabling
    /// it renders the legacy launcher-only pod shape.
    pub native_mode: Option<bool>,
    /// Launcher image override (falls back to the cluster Config).
    pub launcher_image: Option<String>,
    pub launcher_image_pull_policy: Option<String>,
    pub launcher_log_level: Option<String>,
    /// Run containers privileged instead of the curated capability set.
    pub privileged_launcher: Option<bool>,
    /// Name children `<node>` instead of `<topology>-<node>`.
    pub remove_topology_prefix: Option<bool>,
    /// Resource requirements, keyed by node name or `default`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceRequirements>,
    /// Extra env for the launcher container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env: Vec<EnvVar>,
    /// Per-node files projected from ConfigMaps into the pod.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files_from_config_map: BTreeMap<String, Vec<FileFromConfigMap>>,
    /// Per-node files fetched from URLs (carried in the rendered ConfigMap).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files_from_url: BTreeMap<String, Vec<FileFromUrl>>,
    #[serde(default)]
    pub scheduling: Scheduling,
    #[serde(default)]
    pub persistence: Persistence,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileFromConfigMap {
    /// Where the file lands in the pod. Relative paths go under the work dir.
    pub file_path: String,
    pub config_map_name: String,
    pub config_map_path: String,
    /// `read` or `execute`.
    pub mode: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileFromUrl {
    pub file_path: String,
    pub url: String,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Option<Vec<Toleration>>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Persistence {
    /// Persist the node work directory in a PVC.
    #[serde(default)]
    pub enabled: bool,
    /// PVC size, e.g. `5Gi`.
    pub claim_size: Option<String>,
    pub storage_class_name: Option<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusProbes {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_nodes: Vec<String>,
    #[serde(default)]
    pub probe_configuration: ProbeConfiguration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_probe_configurations: BTreeMap<String, ProbeConfiguration>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfiguration {
    /// Total startup window in seconds; divided by the probe period to get
    /// the startup failure threshold.
    pub startup_seconds: Option<i32>,
    pub ssh_probe_configuration: Option<SshProbeConfiguration>,
    pub tcp_probe_configuration: Option<TcpProbeConfiguration>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshProbeConfiguration {
    pub username: String,
    pub password: String,
    pub port: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpProbeConfiguration {
    pub port: i32,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullSettings {
    /// `auto`, `always`, or `never`; falls back to the cluster Config.
    pub pull_through_override: Option<String>,
    /// Secret holding a docker daemon config to mount at /etc/docker.
    pub docker_daemon_config: Option<String>,
    /// Secret holding docker credentials to mount at /root/.docker.
    pub docker_config: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insecure_registries: Vec<String>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, DeriveConditions)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    /// Fingerprint of the rendered node configs; the restart gate.
    pub config_hash: Option<String>,
    /// Rendered per-node configs (YAML), as handed to the launchers.
    pub node_configs: Option<BTreeMap<String, String>>,
    /// Standard Kubernetes-style conditions:
    /// - Ready: all children applied and conforming
    /// - Degraded: a child object failed to reconcile (message names it)
    pub conditions: Option<Vec<K8sCondition>>,
}

impl Topology {
    /// Native mode defaults to true when unset.
    pub fn native_mode(&self) -> bool {
        self.spec.deployment.native_mode.unwrap_or(true)
    }

    pub fn remove_topology_prefix(&self) -> bool {
        self.spec.deployment.remove_topology_prefix.unwrap_or(false)
    }

    /// Name for a node's deployment/service/PVC.
    pub fn node_object_name(&self, node_name: &str) -> String {
        use kube::ResourceExt;
        if self.remove_topology_prefix() {
            node_name.to_string()
        } else {
            format!("{}-{}", self.name_any(), node_name)
        }
    }
}
