//! Tunnel destination resolution.
//!
//! Destinations are cluster DNS names of fabric services. DNS inside a node
//! pod is only trustworthy until the NOS starts, so resolution degrades:
//! literal IP, then DNS (with retries), then the Service's cluster IP read
//! straight from the API, then the first ready Endpoints address.

use std::collections::BTreeSet;
use std::net::IpAddr;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::{Api, Client};
use tokio::net::lookup_host;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::{Error, Result};

const RESOLVE_MAX_ATTEMPTS: usize = 5;
const RESOLVE_RETRY_SLEEP: Duration = Duration::from_secs(10);

/// `service.namespace[.svc...]` -> (service, namespace).
pub fn parse_service_fqdn(fqdn: &str) -> Option<(&str, &str)> {
    let mut parts = fqdn.split('.');
    let service = parts.next().filter(|s| !s.is_empty())?;
    let namespace = parts.next().filter(|s| !s.is_empty())?;
    Some((service, namespace))
}

/// Resolve a tunnel destination to a single IP.
pub async fn resolve_destination(
    client: &Client,
    default_namespace: &str,
    destination: &str,
) -> Result<IpAddr> {
    let destination = destination.trim();

    if let Ok(ip) = destination.parse::<IpAddr>() {
        return Ok(ip);
    }

    match resolve_via_dns(destination).await {
        Ok(ip) => return Ok(ip),
        Err(error) => {
            debug!(%error, destination, "dns resolution inconclusive, trying the cluster api");
        }
    }

    resolve_via_cluster(client, default_namespace, destination).await
}

async fn resolve_via_dns(destination: &str) -> Result<IpAddr> {
    let mut ips: BTreeSet<IpAddr> = BTreeSet::new();

    for attempt in 1..=RESOLVE_MAX_ATTEMPTS {
        match lookup_host((destination, 0u16)).await {
            Ok(addrs) => {
                ips = addrs.map(|a| a.ip()).collect();
                break;
            }
            Err(error) => {
                if attempt == RESOLVE_MAX_ATTEMPTS {
                    return Err(Error::ConnectivityError(format!(
                        "resolving {destination}: {error}"
                    )));
                }
                warn!(
                    destination,
                    %error,
                    "failed resolving remote endpoint but under max attempts, will retry"
                );
                sleep(RESOLVE_RETRY_SLEEP).await;
            }
        }
    }

    if ips.len() != 1 {
        return Err(Error::ConnectivityError(format!(
            "did not get exactly one ip for {destination} (got {})",
            ips.len()
        )));
    }

    Ok(ips.into_iter().next().expect("checked length above"))
}

async fn resolve_via_cluster(
    client: &Client,
    default_namespace: &str,
    destination: &str,
) -> Result<IpAddr> {
    let (service_name, namespace) =
        parse_service_fqdn(destination).unwrap_or((destination, default_namespace));

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    let service = services
        .get(service_name)
        .await
        .map_err(|e| Error::ConnectivityError(format!("reading service {service_name}: {e}")))?;

    if let Some(cluster_ip) = service.spec.as_ref().and_then(|s| s.cluster_ip.clone()) {
        if !cluster_ip.is_empty() && cluster_ip != "None" {
            return cluster_ip.parse().map_err(|_| {
                Error::ConnectivityError(format!(
                    "service {service_name} has unparsable cluster ip {cluster_ip:?}"
                ))
            });
        }
    }

    // headless service: take the first ready endpoint address
    let endpoints: Api<Endpoints> = Api::namespaced(client.clone(), namespace);
    let eps = endpoints
        .get(service_name)
        .await
        .map_err(|e| Error::ConnectivityError(format!("reading endpoints {service_name}: {e}")))?;

    for subset in eps.subsets.unwrap_or_default() {
        for address in subset.addresses.unwrap_or_default() {
            if let Ok(ip) = address.ip.parse() {
                return Ok(ip);
            }
        }
    }

    Err(Error::ConnectivityError(format!(
        "no usable address for destination {destination}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqdn_parsing_variants() {
        assert_eq!(parse_service_fqdn("t1-l2.ns"), Some(("t1-l2", "ns")));
        assert_eq!(
            parse_service_fqdn("t1-l2.ns.svc.cluster.local"),
            Some(("t1-l2", "ns"))
        );
        assert_eq!(parse_service_fqdn("bare"), None);
        assert_eq!(parse_service_fqdn(""), None);
        assert_eq!(parse_service_fqdn(".ns"), None);
    }
}
