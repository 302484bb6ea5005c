//! The node status file backing the k8s exec probes.
//!
//! The deployment's startup/readiness probes grep this file for the healthy
//! token; the launcher keeps it current by probing the NOS management plane
//! (plain TCP dials -- a completed handshake is the liveness signal the
//! probes need).

use std::env;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};

use crate::constants::{
    LAUNCHER_SSH_PROBE_PORT_ENV, LAUNCHER_SSH_PROBE_USERNAME_ENV, LAUNCHER_TCP_PROBE_PORT_ENV,
    NODE_STATUS_FILE, NODE_STATUS_HEALTHY, NODE_STATUS_UNHEALTHY,
};

const PROBE_INTERVAL: Duration = Duration::from_secs(20);
const PROBE_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SSH_PORT: u16 = 22;

/// Ports to dial, from the probe env the controller rendered. Empty when no
/// probes are configured.
pub fn probe_ports_from_env() -> Vec<u16> {
    let mut ports = Vec::new();

    if let Ok(raw) = env::var(LAUNCHER_TCP_PROBE_PORT_ENV) {
        if let Ok(port) = raw.trim().parse() {
            ports.push(port);
        }
    }

    if env::var(LAUNCHER_SSH_PROBE_USERNAME_ENV).is_ok() {
        let port = env::var(LAUNCHER_SSH_PROBE_PORT_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_SSH_PORT);
        ports.push(port);
    }

    ports.dedup();
    ports
}

pub fn write_status(healthy: bool) {
    let token = if healthy {
        NODE_STATUS_HEALTHY
    } else {
        NODE_STATUS_UNHEALTHY
    };
    if let Err(error) = std::fs::write(NODE_STATUS_FILE, token) {
        warn!(%error, "failed writing node status file");
    }
}

async fn port_is_open(port: u16) -> bool {
    matches!(
        timeout(PROBE_DIAL_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Keep the status file current until the pod dies. With no probes
/// configured, connectivity being up (the caller started us) is all the
/// health there is to report.
pub async fn run_status_task() {
    let ports = probe_ports_from_env();

    if ports.is_empty() {
        write_status(true);
        return;
    }

    write_status(false);

    let mut tick = interval(PROBE_INTERVAL);
    loop {
        tick.tick().await;

        let mut healthy = true;
        for port in &ports {
            if !port_is_open(*port).await {
                debug!(port, "status probe dial failed");
                healthy = false;
                break;
            }
        }

        write_status(healthy);
    }
}
