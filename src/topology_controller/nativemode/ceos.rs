use std::collections::BTreeMap;

use tracing::warn;

use super::{
    ensure_empty_dir_mount, env_value, existing_mount_paths, existing_volume_names,
    mount_config_map_file_at, remove_env, upsert_env, ApplyInput,
};

const CEOS_STARTUP_CONFIG_MOUNT: &str = "/mnt/flash/startup-config";

/// Env vars cEOS init requires to boot as a lab container. These are always
/// enforced; INTFTYPE is resolved separately because the node definition may
/// legitimately override it to match its endpoint naming (`etX` vs `ethX`).
const CEOS_ENV: [(&str, &str); 7] = [
    ("CEOS", "1"),
    ("EOS_PLATFORM", "ceoslab"),
    ("container", "docker"),
    ("ETBA", "1"),
    ("SKIP_ZEROTOUCH_BARRIER_IN_SYSDBINIT", "1"),
    ("MAPETH0", "1"),
    ("MGMT_INTF", "eth0"),
];

pub(super) fn apply_ceos(input: &mut ApplyInput<'_>) {
    let mut existing_mounts = existing_mount_paths(input.nos);
    let mut existing_volumes = existing_volume_names(input.deployment);

    // systemd wants writable tmpfs at these paths.
    ensure_empty_dir_mount(
        input,
        &mut existing_mounts,
        &mut existing_volumes,
        "systemd-run",
        "/run",
        Some("Memory"),
    );
    ensure_empty_dir_mount(
        input,
        &mut existing_mounts,
        &mut existing_volumes,
        "systemd-runlock",
        "/run/lock",
        Some("Memory"),
    );
    ensure_empty_dir_mount(
        input,
        &mut existing_mounts,
        &mut existing_volumes,
        "systemd-tmp",
        "/tmp",
        Some("Memory"),
    );

    let startup_config_path = input
        .node_def
        .startup_config
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut startup_config_mounted = false;
    if !startup_config_path.is_empty() {
        startup_config_mounted = mount_config_map_file_at(
            input,
            &mut existing_mounts,
            &startup_config_path,
            CEOS_STARTUP_CONFIG_MOUNT,
        );
    }

    // Management reachability comes from the Kubernetes pod network. Passing
    // CLAB_MGMT_VRF through would repurpose the pod interface and lose the
    // pod IP, so it is stripped.
    remove_env(input.nos, "CLAB_MGMT_VRF");

    let intf_type = env_value(input.nos, "INTFTYPE")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "eth".to_string());

    let mut setenv: BTreeMap<&str, String> = BTreeMap::new();
    for (k, v) in CEOS_ENV {
        upsert_env(input.nos, k, v);
        setenv.insert(k, v.to_string());
    }
    upsert_env(input.nos, "INTFTYPE", &intf_type);
    setenv.insert("INTFTYPE", intf_type);

    // Start /sbin/init with systemd.setenv arguments so the cEOS init code
    // sees these values early; bash exec keeps /sbin/init as PID 1.
    let mut cmd = String::from("exec /sbin/init");
    for (k, v) in &setenv {
        cmd.push_str(&format!(" systemd.setenv={k}={v}"));
    }

    input.nos.command = Some(vec!["bash".into(), "-c".into(), cmd]);

    if !startup_config_mounted && !startup_config_path.is_empty() {
        warn!(
            node = input.node_name,
            path = startup_config_path,
            "ceos startup-config declared but no matching configmap file"
        );
    }
}
