//! Custom resource definitions for the `skyforge.dev/v1alpha1` API group.

pub mod config;
pub mod connectivity;
pub mod imagerequest;
pub mod topology;

pub use config::{Config, ConfigSpec, ResolvedConfig};
pub use connectivity::{Connectivity, ConnectivitySpec, PointToPointTunnel};
pub use imagerequest::{ImageRequest, ImageRequestSpec};
pub use topology::{
    ConnectivityKind, DeploymentSettings, FileFromConfigMap, FileFromUrl, LinkDefinition,
    NodeDefinition, Persistence, ProbeConfiguration, Scheduling, SshProbeConfiguration,
    StatusProbes, TcpProbeConfiguration, Topology, TopologySpec, TopologyStatus,
};

pub const API_GROUP: &str = "skyforge.dev";
pub const API_VERSION: &str = "v1alpha1";
