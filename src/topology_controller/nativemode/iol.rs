use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::warn;

use crate::constants::{
    IOL_PID_ENV, SKYFORGE_ARTIFACTS_PREFIX, SKYFORGE_IOL_LINK_IFACES_ENV, SKYFORGE_IOL_NVRAM_ENV,
    SKYFORGE_NODE_NAME_ENV,
};
use crate::util::kubernetes::config_map_volume_name;
use crate::util::names::{fnv32a, sanitize_linux_if_name};

use super::{
    ensure_empty_dir_mount, existing_mount_paths, existing_volume_names, mount_config_map_file_at,
    sort_env, upsert_env, ApplyInput,
};

/// Boot script for IOL, shipped as an asset and driven entirely through env
/// vars so re-renders never touch it.
const IOL_BOOTSTRAP: &str = include_str!("../../../assets/iol-bootstrap.sh");

const IOL_PID_MOD: u32 = 1023;
const IOL_PID_SHIFT: u32 = 16;

/// Deterministic IOL application id in [1,1023] plus the nvram file name
/// derived from it. Hash of `topology:node`, so the pair always maps to the
/// same pid across re-renders.
pub fn iol_pid_and_nvram(topology_name: &str, node_name: &str) -> (u32, String) {
    let seed = format!("{}:{}", topology_name.trim(), node_name.trim());
    let pid = (fnv32a(&seed) >> IOL_PID_SHIFT) % IOL_PID_MOD + 1;
    (pid, format!("nvram_{pid:05}"))
}

pub(super) fn apply_cisco_iol(input: &mut ApplyInput<'_>) {
    let mut existing_mounts = existing_mount_paths(input.nos);
    let mut existing_volumes = existing_volume_names(input.deployment);

    // Writable scratch space for NETMAP/iouyap.ini/nvram.
    ensure_empty_dir_mount(
        input,
        &mut existing_mounts,
        &mut existing_volumes,
        "vrnetlab-runtime",
        "/vrnetlab",
        None,
    );

    let (pid, nvram) = iol_pid_and_nvram(&input.owning_topology.name_any(), input.node_name);

    mount_netlab_initial_config(input, &mut existing_mounts);
    mount_staged_artifacts(input, &mut existing_mounts);

    upsert_env(input.nos, SKYFORGE_NODE_NAME_ENV, input.node_name);
    upsert_env(input.nos, IOL_PID_ENV, &pid.to_string());
    upsert_env(input.nos, SKYFORGE_IOL_NVRAM_ENV, &nvram);
    upsert_env(
        input.nos,
        SKYFORGE_IOL_LINK_IFACES_ENV,
        &collect_link_ifaces(input).join(","),
    );

    sort_env(input.nos);

    let script = IOL_BOOTSTRAP.trim();
    if script.is_empty() {
        warn!(node = input.node_name, "iol bootstrap script is empty");
    }

    input.nos.command = Some(vec!["bash".into(), "-lc".into(), script.to_string()]);
}

/// The generated initial config is mounted at a fixed path the bootstrap
/// script folds into the IOS boot config. Identified by its ConfigMap key.
fn mount_netlab_initial_config(
    input: &mut ApplyInput<'_>,
    existing_mounts: &mut BTreeSet<String>,
) {
    const MOUNT: &str = "/netlab/initial.cfg";

    if existing_mounts.contains(MOUNT) {
        return;
    }

    let files = input.files_from_config_map;
    let Some(file) = files.iter().find(|f| {
        !f.config_map_name.trim().is_empty() && f.config_map_path.trim() == "initial"
    }) else {
        return;
    };

    let volume_name = config_map_volume_name(&file.config_map_name, &file.config_map_path);
    let sub_path = file.config_map_path.clone();

    input
        .nos
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(k8s_openapi::api::core::v1::VolumeMount {
            name: volume_name,
            read_only: Some(true),
            mount_path: MOUNT.to_string(),
            sub_path: Some(sub_path),
            ..Default::default()
        });
    existing_mounts.insert(MOUNT.to_string());
}

/// Any staged artifacts under the skyforge artifacts prefix are mounted
/// verbatim at their declared paths.
fn mount_staged_artifacts(input: &mut ApplyInput<'_>, existing_mounts: &mut BTreeSet<String>) {
    let staged: Vec<String> = input
        .files_from_config_map
        .iter()
        .filter(|f| {
            !f.config_map_name.trim().is_empty()
                && !f.config_map_path.trim().is_empty()
                && f.file_path.trim().starts_with(SKYFORGE_ARTIFACTS_PREFIX)
        })
        .map(|f| f.file_path.trim().to_string())
        .collect();

    for path in staged {
        mount_config_map_file_at(input, existing_mounts, &path, &path);
    }
}

/// Sorted, sanitized, deduplicated local link interface names for this node.
fn collect_link_ifaces(input: &ApplyInput<'_>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for endpoint in input.links {
        let name = sanitize_linux_if_name(&endpoint.local_interface);
        if !name.is_empty() {
            seen.insert(name);
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_is_deterministic_and_bounded() {
        let (a, nvram_a) = iol_pid_and_nvram("net", "r7");
        let (b, nvram_b) = iol_pid_and_nvram("net", "r7");
        assert_eq!(a, b);
        assert_eq!(nvram_a, nvram_b);
        assert!((1..=1023).contains(&a));
        assert_eq!(nvram_a, format!("nvram_{a:05}"));
    }

    #[test]
    fn pid_varies_with_topology_and_node() {
        let (a, _) = iol_pid_and_nvram("net", "r7");
        let (b, _) = iol_pid_and_nvram("net", "r8");
        let (c, _) = iol_pid_and_nvram("other", "r7");
        // Not guaranteed distinct in general (1023 buckets), but these
        // fixed vectors happen to differ; what matters is stability above.
        assert!(a != b || a != c);
    }
}
