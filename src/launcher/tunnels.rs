//! The node tunnels cache.
//!
//! The setup init container fetches this node's slice of the Connectivity
//! record, substitutes resolvable destinations with concrete IPs, and writes
//! it to the runtime dir. At launch time the cached file wins over a fresh
//! API read -- a NOS can break in-pod DNS, and the data plane must not
//! depend on it.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use kube::{Api, Client};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::crd::{Connectivity, PointToPointTunnel};
use crate::launcher::connectivity::resolve::resolve_destination;
use crate::launcher::runtime::runtime_path;
use crate::{Error, Result};

pub const TUNNELS_FILE_NAME: &str = "node-tunnels.json";

const TUNNELS_DIR_MODE: u32 = 0o750;
const TUNNELS_FILE_MODE: u32 = 0o600;
const CR_FETCH_INTERVAL: Duration = Duration::from_secs(1);
const CR_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Read the cached tunnels list. Missing or empty files are not-found so the
/// caller can fall back to the cluster API.
pub fn tunnels_from_file() -> Result<Vec<PointToPointTunnel>> {
    read_tunnels_file(&runtime_path(TUNNELS_FILE_NAME))
}

fn read_tunnels_file(path: &Path) -> Result<Vec<PointToPointTunnel>> {
    let raw = std::fs::read(path)
        .map_err(|e| Error::NotFound(format!("tunnels cache {}: {e}", path.display())))?;
    if raw.is_empty() {
        return Err(Error::NotFound(format!(
            "tunnels cache {} is empty",
            path.display()
        )));
    }

    serde_json::from_slice(&raw).map_err(Error::SerializationError)
}

/// Fetch this node's tunnels from the Connectivity record.
pub async fn tunnels_from_api(
    client: &Client,
    namespace: &str,
    topology_name: &str,
    node_name: &str,
) -> Result<Vec<PointToPointTunnel>> {
    let api: Api<Connectivity> = Api::namespaced(client.clone(), namespace);
    let connectivity = api.get(topology_name).await.map_err(Error::KubeError)?;

    match connectivity
        .spec
        .point_to_point_tunnels
        .get(node_name)
        .cloned()
    {
        Some(tunnels) => Ok(tunnels),
        None => {
            warn!(
                node = node_name,
                "no tunnels found for node, continuing but things may be broken"
            );
            Ok(Vec::new())
        }
    }
}

/// Cache preference at launch: the file, then the API. Both failing is for
/// the caller to treat as fatal.
pub async fn get_tunnels(
    client: &Client,
    namespace: &str,
    topology_name: &str,
    node_name: &str,
) -> Result<Vec<PointToPointTunnel>> {
    match tunnels_from_file() {
        Ok(tunnels) => Ok(tunnels),
        Err(error) => {
            debug!(%error, "tunnels cache unavailable, falling back to the cluster api");
            tunnels_from_api(client, namespace, topology_name, node_name).await
        }
    }
}

/// Setup-time caching. Waits (bounded) for the Connectivity record to exist
/// -- the controller may still be rendering it when the pod starts -- then
/// pins destinations to IPs where possible and writes the cache file. An
/// existing non-empty cache is left alone.
pub async fn cache_node_tunnels(
    client: &Client,
    namespace: &str,
    topology_name: &str,
    node_name: &str,
) -> Result<()> {
    if node_name.trim().is_empty() {
        return Err(Error::ValidationError(
            "missing LAUNCHER_NODE_NAME".to_string(),
        ));
    }

    let path = runtime_path(TUNNELS_FILE_NAME);
    if let Ok(existing) = std::fs::read(&path) {
        if !existing.is_empty() {
            debug!(path = %path.display(), "tunnels file already present, skipping cache");
            return Ok(());
        }
    }

    ensure_runtime_dir(&path)?;

    let api: Api<Connectivity> = Api::namespaced(client.clone(), namespace);
    let deadline = Instant::now() + CR_FETCH_TIMEOUT;

    let connectivity = loop {
        match api.get_opt(topology_name).await {
            Ok(Some(connectivity)) => break connectivity,
            Ok(None) => {
                debug!(topology = topology_name, "connectivity record not present yet");
            }
            Err(error) => {
                debug!(%error, "connectivity read failed, will retry");
            }
        }

        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "waiting for connectivity record {topology_name:?}"
            )));
        }

        sleep(CR_FETCH_INTERVAL).await;
    };

    let mut tunnels = connectivity
        .spec
        .point_to_point_tunnels
        .get(node_name)
        .cloned()
        .unwrap_or_else(|| {
            warn!(
                node = node_name,
                "no tunnels found for node, continuing but things may be broken"
            );
            Vec::new()
        });

    // Pin destinations while cluster DNS still works; the launcher then
    // never needs to resolve anything.
    for tunnel in tunnels.iter_mut() {
        match resolve_destination(client, namespace, &tunnel.destination).await {
            Ok(ip) => tunnel.destination = ip.to_string(),
            Err(error) => {
                warn!(
                    destination = tunnel.destination.as_str(),
                    %error,
                    "failed pinning tunnel destination, keeping dns name"
                );
            }
        }
    }

    let raw = serde_json::to_vec(&tunnels).map_err(Error::SerializationError)?;
    std::fs::write(&path, raw).map_err(Error::IoError)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(TUNNELS_FILE_MODE))
        .map_err(Error::IoError)?;

    debug!(path = %path.display(), "cached tunnels file");

    Ok(())
}

pub(crate) fn ensure_runtime_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).map_err(Error::IoError)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(TUNNELS_DIR_MODE))
        .map_err(Error::IoError)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_empty_caches_read_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TUNNELS_FILE_NAME);

        assert!(matches!(read_tunnels_file(&path), Err(Error::NotFound(_))));

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(read_tunnels_file(&path), Err(Error::NotFound(_))));
    }

    #[test]
    fn cached_tunnels_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TUNNELS_FILE_NAME);

        let tunnels = vec![PointToPointTunnel {
            local_node: "l1".into(),
            local_interface: "eth1".into(),
            remote_node: "l2".into(),
            remote_interface: "eth1".into(),
            destination: "10.42.0.9".into(),
            tunnel_id: 100,
        }];
        std::fs::write(&path, serde_json::to_vec(&tunnels).unwrap()).unwrap();

        assert_eq!(read_tunnels_file(&path).unwrap(), tunnels);
    }

    #[test]
    fn garbage_cache_is_a_parse_error_not_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TUNNELS_FILE_NAME);
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            read_tunnels_file(&path),
            Err(Error::SerializationError(_))
        ));
    }
}
