//! In-pod connectivity managers, one per topology connectivity flavor.

pub mod resolve;
pub mod vxlan;

use futures::TryStreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::crd::{Connectivity, ConnectivityKind, PointToPointTunnel};
use crate::{Error, Result};

use vxlan::VxlanManager;

/// Run the connectivity manager for this node until shutdown. Initial setup
/// and reconcile failures are both fatal; the pod restarts rather than run a
/// stale data plane.
pub async fn run_manager(
    client: Client,
    namespace: String,
    topology_name: String,
    node_name: String,
    kind: ConnectivityKind,
    native_mode: bool,
    initial: Vec<PointToPointTunnel>,
) -> Result<()> {
    match kind {
        ConnectivityKind::Vxlan => {
            let (tx, rx) = mpsc::channel(4);

            let watch_client = client.clone();
            let watch_namespace = namespace.clone();
            tokio::spawn(async move {
                if let Err(error) =
                    watch_connectivity(watch_client, watch_namespace, topology_name, node_name, tx)
                        .await
                {
                    warn!(%error, "connectivity watch ended");
                }
            });

            VxlanManager::new(client, namespace, native_mode)
                .run(initial, rx)
                .await
        }
        ConnectivityKind::Multus => {
            info!("connectivity mode is 'multus', links are wired by the cluster CNI");
            futures::future::pending::<()>().await;
            Ok(())
        }
        ConnectivityKind::Slurpeeth => Err(Error::ValidationError(
            "slurpeeth connectivity is not supported by this launcher".to_string(),
        )),
    }
}

/// Watch the single Connectivity object for this topology and forward this
/// node's tunnel list on every change.
async fn watch_connectivity(
    client: Client,
    namespace: String,
    topology_name: String,
    node_name: String,
    tx: mpsc::Sender<Vec<PointToPointTunnel>>,
) -> Result<()> {
    let api: Api<Connectivity> = Api::namespaced(client, &namespace);
    let config = watcher::Config::default().fields(&format!("metadata.name={topology_name}"));

    debug!("start connectivity custom resource watch...");

    watcher(api, config)
        .default_backoff()
        .applied_objects()
        .map_err(|e| Error::OtherError(format!("connectivity watch: {e}")))
        .try_for_each(|connectivity| {
            let tx = tx.clone();
            let node_name = node_name.clone();
            async move {
                let tunnels = connectivity
                    .spec
                    .point_to_point_tunnels
                    .get(&node_name)
                    .cloned()
                    .unwrap_or_default();
                tx.send(tunnels)
                    .await
                    .map_err(|_| Error::OtherError("connectivity manager gone".to_string()))
            }
        })
        .await
}
