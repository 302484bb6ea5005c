//! Pod network snapshot and guardian.
//!
//! The pod netns is shared with the NOS, and some NOSes flush eth0 addresses
//! or routes while taking the namespace over. The setup init container
//! snapshots eth0 before any NOS runs; the launcher re-applies the snapshot
//! periodically so the pod stays reachable. Replay only ever adds -- nothing
//! is deleted.

use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

use crate::launcher::exec::{run_tool, tool_succeeds};
use crate::launcher::runtime::runtime_path;
use crate::launcher::tunnels::ensure_runtime_dir;
use crate::{Error, Result};

pub const SNAPSHOT_FILE_NAME: &str = "podnet.json";

const SNAPSHOT_FILE_MODE: u32 = 0o600;
const GUARDIAN_TICK: Duration = Duration::from_secs(2);
const POD_INTERFACE: &str = "eth0";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PodNetSnapshot {
    pub interface: String,
    pub addrs: Vec<PodNetAddr>,
    pub routes: Vec<PodNetRoute>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodNetAddr {
    pub family: String,
    pub local: String,
    pub prefix_len: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodNetRoute {
    pub dst: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dev: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub metric: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

// `ip -j` output shapes.
#[derive(Deserialize)]
struct IpAddrJson {
    #[serde(default)]
    addr_info: Vec<IpAddrInfoJson>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IpAddrInfoJson {
    family: String,
    local: String,
    prefixlen: i32,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct IpRouteJson {
    dst: String,
    gateway: String,
    dev: String,
    scope: String,
    flags: Vec<String>,
    metric: i64,
}

/// Parse the `ip -j addr` / `ip -j route` output into a snapshot, keeping
/// only eth0 addresses and eth0/default routes. Routes pinned to another
/// device were added by something else (commonly the NOS) and are not ours
/// to preserve.
pub fn parse_snapshot(ifname: &str, addr_json: &str, route_json: &str) -> Result<PodNetSnapshot> {
    let addr_items: Vec<IpAddrJson> =
        serde_json::from_str(addr_json).map_err(Error::SerializationError)?;
    let route_items: Vec<IpRouteJson> =
        serde_json::from_str(route_json).map_err(Error::SerializationError)?;

    let mut snapshot = PodNetSnapshot {
        interface: ifname.to_string(),
        ..PodNetSnapshot::default()
    };

    for item in addr_items {
        for info in item.addr_info {
            if info.local.is_empty() || (info.family != "inet" && info.family != "inet6") {
                continue;
            }
            snapshot.addrs.push(PodNetAddr {
                family: info.family,
                local: info.local,
                prefix_len: info.prefixlen,
            });
        }
    }

    for route in route_items {
        if !route.dev.is_empty() && route.dev != ifname {
            continue;
        }

        let dst = if route.dst.is_empty() {
            "default".to_string()
        } else {
            route.dst
        };

        snapshot.routes.push(PodNetRoute {
            dst,
            gateway: route.gateway,
            dev: route.dev,
            scope: route.scope,
            flags: route.flags,
            metric: route.metric,
        });
    }

    Ok(snapshot)
}

/// Replay order: routes without a gateway strictly before routes with one.
/// On /32 pod-IP setups the default route via the gateway is invalid until
/// the link-scope host route to that gateway exists. Order within each group
/// is the capture order.
pub fn route_apply_order(routes: &[PodNetRoute]) -> Vec<&PodNetRoute> {
    let mut ordered: Vec<&PodNetRoute> =
        routes.iter().filter(|r| r.gateway.is_empty()).collect();
    ordered.extend(routes.iter().filter(|r| !r.gateway.is_empty()));
    ordered
}

/// The exact `ip route replace` argument vector for a route.
pub fn route_replace_args(route: &PodNetRoute) -> Vec<String> {
    let mut args = vec!["route".to_string(), "replace".to_string(), route.dst.clone()];
    if !route.gateway.is_empty() {
        args.push("via".to_string());
        args.push(route.gateway.clone());
    }
    if !route.dev.is_empty() {
        args.push("dev".to_string());
        args.push(route.dev.clone());
    }
    if !route.scope.is_empty() {
        args.push("scope".to_string());
        args.push(route.scope.clone());
    }
    if route.flags.iter().any(|f| f == "onlink") {
        args.push("onlink".to_string());
    }
    if route.metric > 0 {
        args.push("metric".to_string());
        args.push(route.metric.to_string());
    }
    args
}

/// Capture the snapshot from the kernel and persist it. Runs in the setup
/// init container, before any NOS process exists.
pub async fn capture_snapshot() -> Result<()> {
    let addr_json = run_tool("ip", &["-j", "addr", "show", "dev", POD_INTERFACE]).await?;
    let route_json = run_tool("ip", &["-j", "route", "show", "table", "main"]).await?;

    let snapshot = parse_snapshot(POD_INTERFACE, &addr_json, &route_json)?;

    let path = runtime_path(SNAPSHOT_FILE_NAME);
    ensure_runtime_dir(&path)?;

    let raw = serde_json::to_vec_pretty(&snapshot).map_err(Error::SerializationError)?;
    std::fs::write(&path, raw).map_err(Error::IoError)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SNAPSHOT_FILE_MODE))
        .map_err(Error::IoError)?;

    debug!(path = %path.display(), "captured pod net snapshot");

    Ok(())
}

pub fn load_snapshot() -> Result<PodNetSnapshot> {
    let path = runtime_path(SNAPSHOT_FILE_NAME);
    let raw = std::fs::read(&path)
        .map_err(|e| Error::NotFound(format!("pod net snapshot {}: {e}", path.display())))?;
    if raw.is_empty() {
        return Err(Error::NotFound(format!(
            "pod net snapshot {} is empty",
            path.display()
        )));
    }
    serde_json::from_slice(&raw).map_err(Error::SerializationError)
}

/// Re-apply the snapshot: interface up, addresses replaced, routes replaced
/// in two passes. Address/route replace is idempotent, so applying over an
/// intact namespace changes nothing. Route errors are logged, not fatal.
pub async fn apply_snapshot(snapshot: &PodNetSnapshot) -> Result<()> {
    if snapshot.interface.is_empty() {
        return Ok(());
    }

    run_tool("ip", &["link", "set", &snapshot.interface, "up"]).await?;

    for addr in &snapshot.addrs {
        if addr.local.is_empty() || addr.prefix_len <= 0 {
            continue;
        }

        let family_flag = if addr.family == "inet6" { "-6" } else { "-4" };
        let cidr = format!("{}/{}", addr.local, addr.prefix_len);
        run_tool(
            "ip",
            &[
                family_flag,
                "addr",
                "replace",
                &cidr,
                "dev",
                &snapshot.interface,
            ],
        )
        .await?;
    }

    for route in route_apply_order(&snapshot.routes) {
        if route.dst.is_empty() {
            continue;
        }

        let args = route_replace_args(route);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        if !tool_succeeds("ip", &arg_refs).await {
            debug!(dst = route.dst.as_str(), "route replace failed");
        }
    }

    Ok(())
}

/// One best-effort repair pass from the persisted snapshot.
pub async fn ensure_from_snapshot() -> Result<()> {
    let snapshot = load_snapshot()?;
    apply_snapshot(&snapshot).await
}

/// Repair loop until the pod dies. A NOS that flushes routes mid-life must
/// not leave the pod unreachable for longer than a tick.
pub async fn run_guardian() {
    let mut tick = interval(GUARDIAN_TICK);
    loop {
        tick.tick().await;
        if let Err(error) = ensure_from_snapshot().await {
            warn!(%error, "pod net guardian pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_JSON: &str = r#"[
        {
            "ifname": "eth0",
            "addr_info": [
                {"family": "inet", "local": "10.42.0.17", "prefixlen": 32},
                {"family": "inet6", "local": "fe80::1", "prefixlen": 64},
                {"family": "inet", "local": "", "prefixlen": 0}
            ]
        }
    ]"#;

    const ROUTE_JSON: &str = r#"[
        {"dst": "", "gateway": "10.0.0.1", "dev": "eth0", "metric": 0},
        {"dst": "10.0.0.1", "dev": "eth0", "scope": "link"},
        {"dst": "172.16.0.0/24", "dev": "net1"}
    ]"#;

    #[test]
    fn parse_keeps_eth0_and_defaults_only() {
        let snapshot = parse_snapshot("eth0", ADDR_JSON, ROUTE_JSON).unwrap();

        assert_eq!(snapshot.addrs.len(), 2);
        assert_eq!(snapshot.addrs[0].local, "10.42.0.17");
        assert_eq!(snapshot.addrs[0].prefix_len, 32);

        // the net1 route is dropped, the empty dst becomes "default"
        assert_eq!(snapshot.routes.len(), 2);
        assert_eq!(snapshot.routes[0].dst, "default");
        assert_eq!(snapshot.routes[1].dst, "10.0.0.1");
        assert_eq!(snapshot.routes[1].scope, "link");
    }

    #[test]
    fn replay_orders_no_gateway_routes_first() {
        let snapshot = parse_snapshot("eth0", ADDR_JSON, ROUTE_JSON).unwrap();
        let ordered = route_apply_order(&snapshot.routes);

        // the link-scope host route to the gateway must precede the default
        assert_eq!(ordered[0].dst, "10.0.0.1");
        assert!(ordered[0].gateway.is_empty());
        assert_eq!(ordered[1].dst, "default");
        assert_eq!(ordered[1].gateway, "10.0.0.1");
    }

    #[test]
    fn route_replace_args_record_the_exact_invocation() {
        let snapshot = parse_snapshot("eth0", ADDR_JSON, ROUTE_JSON).unwrap();
        let ordered = route_apply_order(&snapshot.routes);

        assert_eq!(
            route_replace_args(ordered[0]),
            vec!["route", "replace", "10.0.0.1", "dev", "eth0", "scope", "link"]
        );
        assert_eq!(
            route_replace_args(ordered[1]),
            vec!["route", "replace", "default", "via", "10.0.0.1", "dev", "eth0"]
        );
    }

    #[test]
    fn onlink_flag_and_metric_are_carried() {
        let route = PodNetRoute {
            dst: "default".into(),
            gateway: "169.254.1.1".into(),
            dev: "eth0".into(),
            flags: vec!["onlink".into()],
            metric: 100,
            ..PodNetRoute::default()
        };
        assert_eq!(
            route_replace_args(&route),
            vec![
                "route",
                "replace",
                "default",
                "via",
                "169.254.1.1",
                "dev",
                "eth0",
                "onlink",
                "metric",
                "100"
            ]
        );
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snapshot = parse_snapshot("eth0", ADDR_JSON, ROUTE_JSON).unwrap();
        let raw = serde_json::to_vec(&snapshot).unwrap();
        let parsed: PodNetSnapshot = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
