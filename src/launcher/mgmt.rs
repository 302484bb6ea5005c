//! Management-plane helpers for vrnetlab-backed nodes.
//!
//! QEMU user networking (and iouyap for IOL) terminate the NOS management
//! plane on an internal veth; these helpers make it reachable on the pod IP:
//! a TCP proxy for SSH after a boot grace period, and an immediate
//! single-datagram UDP proxy for SNMP.

use std::time::Duration;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::constants::{
    VRNETLAB_MGMT_HOST_CIDR, VRNETLAB_MGMT_HOST_DEV, VRNETLAB_MGMT_NOS_ADDR, VRNETLAB_MGMT_NOS_DEV,
};
use crate::launcher::exec::{link_exists, run_tool, tool_succeeds};
use crate::{Error, Result};

const SSH_PROXY_LISTEN: &str = "0.0.0.0:22";
const SNMP_PROXY_LISTEN: &str = "0.0.0.0:161";
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const SNMP_REPLY_TIMEOUT: Duration = Duration::from_secs(3);
const VETH_SETTLE_WAIT: Duration = Duration::from_millis(50);
const VETH_SETTLE_MAX: usize = 40; // 2s total

/// Boot grace before arming the SSH proxy. QEMU-backed images take minutes;
/// IOL is a bare process and needs only seconds.
pub fn ssh_proxy_grace(node_kind: &str) -> Duration {
    match node_kind.trim().to_lowercase().as_str() {
        "cisco_iol" | "cisco_ioll2" => Duration::from_secs(5),
        _ => Duration::from_secs(2 * 60),
    }
}

fn nos_mgmt_addr(port: u16) -> String {
    format!("{VRNETLAB_MGMT_NOS_ADDR}:{port}")
}

/// Ensure the internal management veth exists, is addressed, and is up.
/// Idempotent; the IOL bootstrap creates the same pair and both sides
/// tolerate the other having won the race.
pub async fn ensure_mgmt_veth() -> Result<()> {
    if !link_exists(VRNETLAB_MGMT_HOST_DEV).await {
        run_tool(
            "ip",
            &[
                "link",
                "add",
                VRNETLAB_MGMT_HOST_DEV,
                "type",
                "veth",
                "peer",
                "name",
                VRNETLAB_MGMT_NOS_DEV,
            ],
        )
        .await
        .map_err(|e| Error::ConnectivityError(format!("creating mgmt veth: {e}")))?;
    }

    // both ends can appear a beat after the add returns
    for _ in 0..VETH_SETTLE_MAX {
        if link_exists(VRNETLAB_MGMT_HOST_DEV).await && link_exists(VRNETLAB_MGMT_NOS_DEV).await {
            break;
        }
        sleep(VETH_SETTLE_WAIT).await;
    }

    let _ = tool_succeeds(
        "ip",
        &["addr", "add", VRNETLAB_MGMT_HOST_CIDR, "dev", VRNETLAB_MGMT_HOST_DEV],
    )
    .await;
    let _ = tool_succeeds("ip", &["link", "set", VRNETLAB_MGMT_HOST_DEV, "up"]).await;
    let _ = tool_succeeds("ip", &["link", "set", VRNETLAB_MGMT_NOS_DEV, "up"]).await;

    Ok(())
}

/// Disable tx/tso/gso/gro on an interface. QEMU user networking mishandles
/// CHECKSUM_PARTIAL on veth, which silently breaks TCP on the mgmt path.
/// Best-effort: an absent interface or unsupported offload is not fatal.
pub async fn disable_interface_offloads(iface: &str) {
    if iface.is_empty() {
        return;
    }

    if !tool_succeeds("ethtool", &["--version"]).await {
        warn!(iface, "ethtool not found; cannot disable offloads");
        return;
    }

    if tool_succeeds(
        "ethtool",
        &["-K", iface, "tx", "off", "tso", "off", "gso", "off", "gro", "off"],
    )
    .await
    {
        info!(iface, "disabled offloads");
    } else {
        warn!(iface, "failed disabling offloads");
    }
}

/// TCP proxy `:22 -> NOS mgmt :22`, armed after the grace period. If the
/// port is already bound by then (QEMU hostfwd got there first) the proxy
/// stands down.
pub async fn run_ssh_proxy(grace: Duration) {
    sleep(grace).await;

    let listener = match TcpListener::bind(SSH_PROXY_LISTEN).await {
        Ok(listener) => listener,
        Err(error) => {
            info!(%error, "port 22 already bound (qemu hostfwd?), ssh proxy standing down");
            return;
        }
    };

    info!(
        target = nos_mgmt_addr(22).as_str(),
        "vrnetlab ssh proxy enabled"
    );

    loop {
        let (mut inbound, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!(%error, "transient accept error");
                continue;
            }
        };

        tokio::spawn(async move {
            let outbound = timeout(DIAL_TIMEOUT, TcpStream::connect(nos_mgmt_addr(22))).await;
            let Ok(Ok(mut outbound)) = outbound else {
                debug!(%peer, "failed dialing nos mgmt ssh");
                return;
            };

            let _ = copy_bidirectional(&mut inbound, &mut outbound).await;
        });
    }
}

/// Single-datagram UDP proxy `:161 -> NOS mgmt :161`, armed immediately.
pub async fn run_snmp_proxy() {
    let socket = match UdpSocket::bind(SNMP_PROXY_LISTEN).await {
        Ok(socket) => socket,
        Err(error) => {
            warn!(%error, "failed binding snmp proxy socket");
            return;
        }
    };

    info!(
        target = nos_mgmt_addr(161).as_str(),
        "vrnetlab snmp proxy enabled"
    );

    let mut request = vec![0u8; 64 * 1024];
    let mut reply = vec![0u8; 64 * 1024];

    loop {
        let (len, client) = match socket.recv_from(&mut request).await {
            Ok(received) => received,
            Err(error) => {
                debug!(%error, "snmp recv error");
                continue;
            }
        };

        let upstream = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(upstream) => upstream,
            Err(error) => {
                debug!(%error, "snmp upstream socket error");
                continue;
            }
        };

        if upstream
            .send_to(&request[..len], nos_mgmt_addr(161))
            .await
            .is_err()
        {
            continue;
        }

        match timeout(SNMP_REPLY_TIMEOUT, upstream.recv(&mut reply)).await {
            Ok(Ok(reply_len)) => {
                let _ = socket.send_to(&reply[..reply_len], client).await;
            }
            _ => {
                debug!(%client, "no snmp reply from nos");
            }
        }
    }
}

/// Arm the management helpers when this node is a vrnetlab image in native
/// mode. All of it is best-effort: the data plane does not depend on any of
/// these.
pub async fn maybe_start_mgmt_helpers(node_kind: &str, node_image: &str, native_mode: bool) {
    if !native_mode {
        return;
    }

    if !node_image.trim().to_lowercase().contains("/vrnetlab/") {
        return;
    }

    if let Err(error) = ensure_mgmt_veth().await {
        warn!(%error, "failed ensuring vrnetlab mgmt veth");
    }

    disable_interface_offloads(VRNETLAB_MGMT_HOST_DEV).await;
    disable_interface_offloads(VRNETLAB_MGMT_NOS_DEV).await;

    let grace = ssh_proxy_grace(node_kind);
    tokio::spawn(run_ssh_proxy(grace));
    tokio::spawn(run_snmp_proxy());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iol_gets_the_short_grace() {
        assert_eq!(ssh_proxy_grace("cisco_iol"), Duration::from_secs(5));
        assert_eq!(ssh_proxy_grace("cisco_ioll2"), Duration::from_secs(5));
        assert_eq!(ssh_proxy_grace("vr-vmx"), Duration::from_secs(120));
        assert_eq!(ssh_proxy_grace(""), Duration::from_secs(120));
    }
}
