//! The in-pod agent. `setup` runs as an init container and captures state
//! before the NOS exists; `launch` builds the data plane and babysits the
//! pod for the node's lifetime.

pub mod connectivity;
pub mod exec;
pub mod mgmt;
pub mod native;
pub mod podnet;
pub mod runtime;
pub mod status;
pub mod tunnels;

use std::env;

use kube::Client;
use tracing::{info, warn};

use crate::constants;
use crate::crd::ConnectivityKind;
use crate::topology_controller::configs::NodeConfig;
use crate::{Error, Result};

pub struct Launcher {
    pub client: Client,
    pub namespace: String,
    pub topology_name: String,
    pub node_name: String,
    pub node_image: String,
    pub native_mode: bool,
    pub connectivity_kind: ConnectivityKind,
    /// Parsed from the mounted per-node config; absent in stripped-down
    /// setups (kind-specific behavior then degrades to generic).
    pub node_config: Option<NodeConfig>,
}

fn required_env(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::ValidationError(format!("missing {name}")))
}

impl Launcher {
    pub async fn from_env() -> Result<Self> {
        let client = Client::try_default().await.map_err(Error::KubeError)?;

        let connectivity_raw = env::var(constants::LAUNCHER_CONNECTIVITY_KIND_ENV)
            .unwrap_or_else(|_| constants::CONNECTIVITY_VXLAN.to_string());
        let connectivity_kind = ConnectivityKind::parse(&connectivity_raw).ok_or_else(|| {
            Error::ValidationError(format!(
                "unrecognized connectivity kind {connectivity_raw:?}"
            ))
        })?;

        let node_config = match std::fs::read_to_string(constants::NODE_CONFIG_FILE) {
            Ok(raw) => match serde_yaml::from_str::<NodeConfig>(&raw) {
                Ok(config) => Some(config),
                Err(error) => {
                    warn!(%error, "failed parsing mounted node config");
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self {
            client,
            namespace: required_env(constants::POD_NAMESPACE_ENV)?,
            topology_name: required_env(constants::LAUNCHER_TOPOLOGY_NAME_ENV)?,
            node_name: required_env(constants::LAUNCHER_NODE_NAME_ENV)?,
            node_image: env::var(constants::LAUNCHER_NODE_IMAGE_ENV).unwrap_or_default(),
            native_mode: env::var(constants::LAUNCHER_NATIVE_MODE_ENV)
                .map(|v| v == constants::TRUE)
                .unwrap_or(false),
            connectivity_kind,
            node_config,
        })
    }

    pub fn node_kind(&self) -> String {
        self.node_config
            .as_ref()
            .map(|c| c.kind.clone())
            .unwrap_or_default()
    }

    /// The init-container phase: snapshot the pod network and cache the
    /// tunnels file before any NOS process can touch the shared netns.
    /// Failures here are fatal -- a pod that starts without this state
    /// cannot be repaired later.
    pub async fn setup(&self) -> Result<()> {
        info!(node = self.node_name.as_str(), "running launcher setup");

        if self.native_mode {
            podnet::capture_snapshot().await?;
        }

        tunnels::cache_node_tunnels(
            &self.client,
            &self.namespace,
            &self.topology_name,
            &self.node_name,
        )
        .await?;

        info!("launcher setup complete");
        Ok(())
    }

    /// The long-running phase. Ordering matters: devices are checked before
    /// anything is created, the pod net is repaired before tunnels dial out,
    /// and the status task starts only after the tunnels list loaded.
    pub async fn launch(&self) -> Result<()> {
        if !self.native_mode {
            return Err(Error::ValidationError(
                "this launcher only supports native mode".to_string(),
            ));
        }

        let node_kind = self.node_kind();
        info!(
            node = self.node_name.as_str(),
            kind = node_kind.as_str(),
            "launching node"
        );

        native::ensure_native_device_requirements(&node_kind, &self.node_image)?;

        // one repair pass up front, then the periodic guardian
        if let Err(error) = podnet::ensure_from_snapshot().await {
            warn!(%error, "initial pod net repair failed");
        }
        tokio::spawn(podnet::run_guardian());

        let initial_tunnels = tunnels::get_tunnels(
            &self.client,
            &self.namespace,
            &self.topology_name,
            &self.node_name,
        )
        .await?;

        mgmt::maybe_start_mgmt_helpers(&node_kind, &self.node_image, self.native_mode).await;

        tokio::spawn(status::run_status_task());

        // runs until shutdown; tunnel errors bubble out and kill the pod
        connectivity::run_manager(
            self.client.clone(),
            self.namespace.clone(),
            self.topology_name.clone(),
            self.node_name.clone(),
            self.connectivity_kind,
            self.native_mode,
            initial_tunnels,
        )
        .await
    }
}
