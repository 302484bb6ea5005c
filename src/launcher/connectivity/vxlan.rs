//! The VXLAN link manager.
//!
//! For each tunnel: a host-side veth whose peer is the bare link interface
//! (the one the NOS uses), and a `vx-<hostSide>` vxlan interface cross
//! redirected with the veth. The tunnels map is owned by the single manager
//! task; updates arrive over a channel from the Connectivity watcher.

use std::collections::BTreeMap;

use kube::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::VXLAN_SERVICE_PORT;
use crate::crd::PointToPointTunnel;
use crate::launcher::exec::{link_exists, run_tool};
use crate::util::names::{sanitize_linux_if_name, vxlan_host_side_link_name, VXLAN_IF_PREFIX};
use crate::{Error, Result};

use super::resolve::resolve_destination;

/// What an update pass must do, computed before any tool runs.
#[derive(Debug, Default, PartialEq)]
pub struct TunnelDelta {
    pub to_delete: Vec<PointToPointTunnel>,
    pub to_recreate: Vec<PointToPointTunnel>,
}

/// Diff current state against a desired list, keyed by local interface.
/// Unchanged tunnels are left alone; a changed tunnel is deleted before it
/// is re-created.
pub fn diff_tunnels(
    current: &BTreeMap<String, PointToPointTunnel>,
    desired: &[PointToPointTunnel],
) -> TunnelDelta {
    let mut delta = TunnelDelta::default();

    for (local_interface, existing) in current {
        if !desired
            .iter()
            .any(|t| t.local_interface == *local_interface)
        {
            delta.to_delete.push(existing.clone());
        }
    }

    for tunnel in desired {
        match current.get(&tunnel.local_interface) {
            Some(existing) if existing == tunnel => {}
            _ => delta.to_recreate.push(tunnel.clone()),
        }
    }

    delta
}

pub struct VxlanManager {
    client: Client,
    namespace: String,
    native_mode: bool,
    current: BTreeMap<String, PointToPointTunnel>,
}

impl VxlanManager {
    pub fn new(client: Client, namespace: String, native_mode: bool) -> Self {
        Self {
            client,
            namespace,
            native_mode,
            current: BTreeMap::new(),
        }
    }

    /// Create the initial tunnels, then serve updates until the channel
    /// closes. Any tunnel setup error is fatal: a stale data plane is worse
    /// than a pod restart.
    pub async fn run(
        mut self,
        initial: Vec<PointToPointTunnel>,
        mut updates: mpsc::Receiver<Vec<PointToPointTunnel>>,
    ) -> Result<()> {
        info!("connectivity mode is 'vxlan', setting up any required tunnels...");

        for tunnel in initial {
            self.create_tunnel(&tunnel).await.map_err(|e| {
                Error::ConnectivityError(format!(
                    "failed setting up tunnel to remote node {:?} for local interface {:?}: {e}",
                    tunnel.remote_node, tunnel.local_interface
                ))
            })?;
            self.current.insert(tunnel.local_interface.clone(), tunnel);
        }

        debug!("initial vxlan tunnel creation complete");

        while let Some(desired) = updates.recv().await {
            self.apply_update(desired).await?;
        }

        Ok(())
    }

    /// One reconcile pass against a new desired list.
    pub async fn apply_update(&mut self, desired: Vec<PointToPointTunnel>) -> Result<()> {
        let delta = diff_tunnels(&self.current, &desired);

        for tunnel in &delta.to_delete {
            self.delete_tunnel(tunnel).await.map_err(|e| {
                Error::ConnectivityError(format!(
                    "failed deleting extraneous tunnel to remote node {:?} for local interface {:?}: {e}",
                    tunnel.remote_node, tunnel.local_interface
                ))
            })?;
            self.current.remove(&tunnel.local_interface);
        }

        for tunnel in &delta.to_recreate {
            if self.current.contains_key(&tunnel.local_interface) {
                // changed tunnel: tear the old one down before re-creating
                self.delete_tunnel(tunnel).await.map_err(|e| {
                    Error::ConnectivityError(format!(
                        "failed deleting existing tunnel for local interface {:?} before re-configuring: {e}",
                        tunnel.local_interface
                    ))
                })?;
                self.current.remove(&tunnel.local_interface);
            }
        }

        for tunnel in delta.to_recreate {
            self.create_tunnel(&tunnel).await.map_err(|e| {
                Error::ConnectivityError(format!(
                    "failed setting up tunnel to remote node {:?} for local interface {:?}: {e}",
                    tunnel.remote_node, tunnel.local_interface
                ))
            })?;
            self.current.insert(tunnel.local_interface.clone(), tunnel);
        }

        Ok(())
    }

    async fn create_tunnel(&self, tunnel: &PointToPointTunnel) -> Result<()> {
        let remote = resolve_destination(&self.client, &self.namespace, &tunnel.destination)
            .await?
            .to_string();

        debug!(remote = remote.as_str(), "resolved remote vxlan tunnel address");

        let link = sanitize_linux_if_name(&tunnel.local_interface);
        let host_side = vxlan_host_side_link_name(&tunnel.local_node, &link);
        let vx_name = format!("{VXLAN_IF_PREFIX}{host_side}");

        // idempotent recovery: a leftover vxlan interface from a previous
        // run is expected to not exist on the first pass
        if let Err(error) = self.delete_vxlan_interface(&host_side).await {
            warn!(vx = vx_name.as_str(), %error, "pre-create delete failed");
        }

        if self.native_mode {
            self.ensure_pod_link_exists(&host_side, &link).await?;
        }

        let vni = tunnel.tunnel_id.to_string();
        let port = VXLAN_SERVICE_PORT.to_string();
        run_tool(
            "ip",
            &[
                "link", "add", &vx_name, "type", "vxlan", "id", &vni, "remote", &remote,
                "dstport", &port,
            ],
        )
        .await?;
        run_tool("ip", &["link", "set", &vx_name, "up"]).await?;

        // cross-redirect the vxlan interface and the host side of the veth
        run_tool("tc", &["qdisc", "replace", "dev", &host_side, "ingress"]).await?;
        run_tool("tc", &["qdisc", "replace", "dev", &vx_name, "ingress"]).await?;
        run_tool(
            "tc",
            &[
                "filter", "replace", "dev", &host_side, "ingress", "pref", "1", "protocol",
                "all", "matchall", "action", "mirred", "egress", "redirect", "dev", &vx_name,
            ],
        )
        .await?;
        run_tool(
            "tc",
            &[
                "filter", "replace", "dev", &vx_name, "ingress", "pref", "1", "protocol",
                "all", "matchall", "action", "mirred", "egress", "redirect", "dev", &host_side,
            ],
        )
        .await?;

        info!(
            vx = vx_name.as_str(),
            vni = tunnel.tunnel_id,
            remote = remote.as_str(),
            "vxlan tunnel up"
        );

        Ok(())
    }

    async fn delete_tunnel(&self, tunnel: &PointToPointTunnel) -> Result<()> {
        let link = sanitize_linux_if_name(&tunnel.local_interface);
        let host_side = vxlan_host_side_link_name(&tunnel.local_node, &link);
        self.delete_vxlan_interface(&host_side).await
    }

    async fn delete_vxlan_interface(&self, host_side: &str) -> Result<()> {
        let vx_name = format!("{VXLAN_IF_PREFIX}{host_side}");
        run_tool("ip", &["link", "del", &vx_name]).await?;
        Ok(())
    }

    /// In native mode nothing wires the veth pair an endpoint expects, so
    /// the manager creates `<hostSide> <-> <link>` itself. A bare link that
    /// already exists without its host side is someone else's interface and
    /// must not be clobbered.
    async fn ensure_pod_link_exists(&self, host_side: &str, link: &str) -> Result<()> {
        if link_exists(host_side).await {
            return Ok(());
        }

        if link_exists(link).await {
            return Err(Error::ConnectivityError(format!(
                "expected vxlan link {host_side:?} missing but interface {link:?} already exists"
            )));
        }

        run_tool(
            "ip",
            &["link", "add", host_side, "type", "veth", "peer", "name", link],
        )
        .await
        .map_err(|e| {
            Error::ConnectivityError(format!("failed creating veth {host_side:?} <-> {link:?}: {e}"))
        })?;

        run_tool("ip", &["link", "set", host_side, "up"]).await?;
        run_tool("ip", &["link", "set", link, "up"]).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(local_if: &str, destination: &str) -> PointToPointTunnel {
        PointToPointTunnel {
            local_node: "l1".into(),
            local_interface: local_if.into(),
            remote_node: "l2".into(),
            remote_interface: "eth1".into(),
            destination: destination.into(),
            tunnel_id: 100,
        }
    }

    #[test]
    fn update_with_identical_list_is_a_noop() {
        let mut current = BTreeMap::new();
        current.insert("eth1".to_string(), tunnel("eth1", "t1-l2.ns"));
        current.insert("eth2".to_string(), tunnel("eth2", "t1-l2.ns"));

        let desired = vec![tunnel("eth1", "t1-l2.ns"), tunnel("eth2", "t1-l2.ns")];
        let delta = diff_tunnels(&current, &desired);
        assert!(delta.to_delete.is_empty());
        assert!(delta.to_recreate.is_empty());
    }

    #[test]
    fn removed_link_is_deleted_untouched_link_is_kept() {
        let mut current = BTreeMap::new();
        current.insert("eth1".to_string(), tunnel("eth1", "t1-l2.ns"));
        current.insert("eth2".to_string(), tunnel("eth2", "t1-l2.ns"));

        let desired = vec![tunnel("eth1", "t1-l2.ns")];
        let delta = diff_tunnels(&current, &desired);

        assert_eq!(delta.to_delete.len(), 1);
        assert_eq!(delta.to_delete[0].local_interface, "eth2");
        assert!(delta.to_recreate.is_empty());
    }

    #[test]
    fn changed_destination_triggers_recreate() {
        let mut current = BTreeMap::new();
        current.insert("eth1".to_string(), tunnel("eth1", "t1-l2.ns"));

        let desired = vec![tunnel("eth1", "10.42.0.9")];
        let delta = diff_tunnels(&current, &desired);

        assert!(delta.to_delete.is_empty());
        assert_eq!(delta.to_recreate.len(), 1);
        assert_eq!(delta.to_recreate[0].destination, "10.42.0.9");
    }

    #[test]
    fn new_link_is_created_without_touching_existing() {
        let mut current = BTreeMap::new();
        current.insert("eth1".to_string(), tunnel("eth1", "t1-l2.ns"));

        let desired = vec![tunnel("eth1", "t1-l2.ns"), tunnel("eth3", "t1-l3.ns")];
        let delta = diff_tunnels(&current, &desired);

        assert!(delta.to_delete.is_empty());
        assert_eq!(delta.to_recreate.len(), 1);
        assert_eq!(delta.to_recreate[0].local_interface, "eth3");
    }
}
