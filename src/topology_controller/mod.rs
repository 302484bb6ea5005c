//! The topology controller: turns a Topology into deployments, services,
//! config maps, attachments, and the Connectivity record.

pub mod configmap;
pub mod configs;
pub mod connectivity;
pub mod deployment;
pub mod nad;
pub mod nativemode;
pub mod rbac;
mod reconcile;
pub mod service;

mod controller;

pub use controller::{run, State};

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use crate::constants;
use crate::crd::Topology;

use configs::NodeConfig;

pub static MANAGER_NAME: &str = "skyforge-topology-controller";

/// Labels every owned child carries.
pub fn topology_labels(topology: &Topology) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            constants::LABEL_APP.to_string(),
            constants::APP_NAME_DEFAULT.to_string(),
        ),
        (
            constants::LABEL_TOPOLOGY_OWNER.to_string(),
            topology.name_any(),
        ),
    ])
}

/// Previous/current rendered state for one reconcile pass: the hash lattice
/// the restart decision and status updates hang off.
#[derive(Debug, Default)]
pub struct ReconcileData {
    pub previous_hash: Option<String>,
    pub resolved_hash: String,
    pub previous_configs: BTreeMap<String, NodeConfig>,
    pub resolved_configs: BTreeMap<String, NodeConfig>,
    pub nodes_needing_restart: BTreeSet<String>,
}

impl ReconcileData {
    /// Seed from the topology status (previous side) and the freshly
    /// resolved configs (current side).
    pub fn new(
        topology: &Topology,
        resolved_configs: BTreeMap<String, NodeConfig>,
        resolved_hash: String,
    ) -> Self {
        let mut previous_configs = BTreeMap::new();
        if let Some(status) = &topology.status {
            for (node, raw) in status.node_configs.clone().unwrap_or_default() {
                // YAML round-tripped through status; parse failures just mean
                // the node counts as new
                if let Ok(config) = serde_yaml::from_str::<NodeConfig>(&raw) {
                    previous_configs.insert(node, config);
                }
            }
        }

        Self {
            previous_hash: topology
                .status
                .as_ref()
                .and_then(|s| s.config_hash.clone()),
            resolved_hash,
            previous_configs,
            resolved_configs,
            nodes_needing_restart: BTreeSet::new(),
        }
    }
}
