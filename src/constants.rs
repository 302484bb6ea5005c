//! Shared constants: ports, env var names, labels, in-pod paths.

/// Default name for the "app" (the helm value appName).
pub const APP_NAME_DEFAULT: &str = "skyforge";

/// UDP destination port used for per-link VXLAN tunnels.
///
/// NOTE: 6784 is used intentionally -- Arista cEOS installs a restrictive
/// default iptables policy that explicitly allows a small set of UDP ports
/// including 4784/6784/7784. Using one of those avoids NOS-specific firewall
/// changes to support VXLAN-based link emulation.
pub const VXLAN_SERVICE_PORT: i32 = 6784;

/// TCP port exposed on fabric services for slurpeeth connectivity.
pub const SLURPEETH_SERVICE_PORT: i32 = 4799;

/// VNI assigned to link index 0; link `i` gets `VXLAN_VNI_BASE + i`.
pub const VXLAN_VNI_BASE: i64 = 100;

pub const CONNECTIVITY_VXLAN: &str = "vxlan";
pub const CONNECTIVITY_SLURPEETH: &str = "slurpeeth";
pub const CONNECTIVITY_MULTUS: &str = "multus";

// Labels.
pub const LABEL_KUBERNETES_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP: &str = "skyforge/app";
pub const LABEL_NAME: &str = "skyforge/name";
pub const LABEL_TOPOLOGY_OWNER: &str = "skyforge/topology-owner";
pub const LABEL_TOPOLOGY_NODE: &str = "skyforge/topology-node";
pub const LABEL_TOPOLOGY_KIND: &str = "skyforge/topology-kind";

// Env vars set on every launcher/setup container.
pub const APP_NAME_ENV: &str = "APP_NAME";
pub const NODE_NAME_ENV: &str = "NODE_NAME";
pub const POD_NAME_ENV: &str = "POD_NAME";
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const MANAGER_NAMESPACE_ENV: &str = "MANAGER_NAMESPACE";
pub const LAUNCHER_NODE_NAME_ENV: &str = "LAUNCHER_NODE_NAME";
pub const LAUNCHER_NODE_IMAGE_ENV: &str = "LAUNCHER_NODE_IMAGE";
pub const LAUNCHER_TOPOLOGY_NAME_ENV: &str = "LAUNCHER_TOPOLOGY_NAME";
pub const LAUNCHER_CONNECTIVITY_KIND_ENV: &str = "LAUNCHER_CONNECTIVITY_KIND";
pub const LAUNCHER_NATIVE_MODE_ENV: &str = "LAUNCHER_NATIVE_MODE";
pub const LAUNCHER_RUNTIME_DIR_ENV: &str = "LAUNCHER_RUNTIME_DIR";
pub const LAUNCHER_CRI_KIND_ENV: &str = "LAUNCHER_CRI_KIND";
pub const LAUNCHER_IMAGE_PULL_THROUGH_MODE_ENV: &str = "LAUNCHER_IMAGE_PULL_THROUGH_MODE";
pub const LAUNCHER_LOGGER_LEVEL_ENV: &str = "LAUNCHER_LOGGER_LEVEL";
pub const LAUNCHER_PRIVILEGED_ENV: &str = "LAUNCHER_PRIVILEGED";
pub const LAUNCHER_TCP_PROBE_PORT_ENV: &str = "LAUNCHER_TCP_PROBE_PORT";
pub const LAUNCHER_SSH_PROBE_USERNAME_ENV: &str = "LAUNCHER_SSH_PROBE_USERNAME";
pub const LAUNCHER_SSH_PROBE_PASSWORD_ENV: &str = "LAUNCHER_SSH_PROBE_PASSWORD";
pub const LAUNCHER_SSH_PROBE_PORT_ENV: &str = "LAUNCHER_SSH_PROBE_PORT";

// In-pod paths.
pub const LAUNCHER_WORKDIR: &str = "/skyforge";
pub const DEFAULT_RUNTIME_DIR: &str = "/skyforge/runtime";
pub const NODE_CONFIG_FILE: &str = "/skyforge/topology.yaml";
pub const FILES_FROM_URL_FILE: &str = "/skyforge/files-from-url.yaml";
pub const NODE_STATUS_FILE: &str = "/skyforge/node-status";
pub const NODE_STATUS_HEALTHY: &str = "healthy";
pub const NODE_STATUS_UNHEALTHY: &str = "unhealthy";

// Container names.
pub const LAUNCHER_CONTAINER: &str = "skyforge-launcher";
pub const SETUP_CONTAINER: &str = "skyforge-setup";
pub const LAUNCHER_SERVICE_ACCOUNT: &str = "skyforge-launcher-service-account";
pub const LAUNCHER_COMMAND: &str = "/skyforge/launcher";

// Image pull through.
pub const IMAGE_PULL_THROUGH_MODE_NEVER: &str = "never";
pub const CRI_KIND_CONTAINERD: &str = "containerd";
pub const CRI_SOCK_CONTAINERD_DIR: &str = "/run/containerd";
pub const CRI_SOCK_CONTAINERD: &str = "containerd.sock";
pub const LAUNCHER_CRI_SOCK_PATH: &str = "/skyforge/cri";

// ConfigMap file modes for filesFromConfigMap entries.
pub const FILE_MODE_READ: &str = "read";
pub const FILE_MODE_EXECUTE: &str = "execute";

pub const PERMISSIONS_EVERYONE_READ: i32 = 0o444;
pub const PERMISSIONS_EVERYONE_READ_EXECUTE: i32 = 0o555;
pub const PERMISSIONS_EVERYONE_READ_WRITE_OWNER_EXECUTE: i32 = 0o766;

// vrnetlab management plane inside node pods.
pub const VRNETLAB_MGMT_HOST_DEV: &str = "vrl-mgmt0";
pub const VRNETLAB_MGMT_NOS_DEV: &str = "vrl-mgmt1";
pub const VRNETLAB_MGMT_HOST_CIDR: &str = "169.254.100.1/30";
pub const VRNETLAB_MGMT_NOS_ADDR: &str = "169.254.100.2";

// Env vars consumed by the IOL bootstrap asset.
pub const SKYFORGE_NODE_NAME_ENV: &str = "SKYFORGE_NODE_NAME";
pub const IOL_PID_ENV: &str = "IOL_PID";
pub const SKYFORGE_IOL_NVRAM_ENV: &str = "SKYFORGE_IOL_NVRAM";
pub const SKYFORGE_IOL_LINK_IFACES_ENV: &str = "SKYFORGE_IOL_LINK_IFACES";

/// ConfigMap artifacts staged for IOL under this prefix are mounted verbatim.
pub const SKYFORGE_ARTIFACTS_PREFIX: &str = "/tmp/skyforge-c9s/";

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";
pub const DEFAULT: &str = "default";
pub const TCP: &str = "TCP";
pub const UDP: &str = "UDP";

/// Node kinds backed by vrnetlab/QEMU that get the dedicated management
/// attachment and, for the QEMU ones, KVM device requirements.
pub const VRNETLAB_QEMU_KINDS: [&str; 8] = [
    "cisco_iol",
    "vios",
    "viosl2",
    "vr-n9kv",
    "asav",
    "vmx",
    "sros",
    "csr",
];

/// The secondary management attachment installed cluster-wide by the helm
/// chart for vrnetlab-based kinds.
pub const VRNETLAB_MGMT_NAD_NAME: &str = "vrnetlab-mgmt";
pub const VRNETLAB_MGMT_NAD_NAMESPACE: &str = "kube-system";

pub const MULTUS_NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
