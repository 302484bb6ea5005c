use tracing::warn;

use super::{existing_mount_paths, mount_config_map_file_at, ApplyInput};

/// IOSv/IOSvL2 expect the startup config at a fixed path; the image's own
/// entrypoint applies it (including whatever management services it enables
/// -- nothing is force-enabled here).
pub(super) fn apply_cisco_vios(input: &mut ApplyInput<'_>) {
    const MOUNT: &str = "/config/startup-config.cfg";

    let startup_config_path = input
        .node_def
        .startup_config
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();
    if startup_config_path.is_empty() {
        return;
    }

    let mut existing_mounts = existing_mount_paths(input.nos);
    if !mount_config_map_file_at(input, &mut existing_mounts, &startup_config_path, MOUNT) {
        warn!(
            node = input.node_name,
            path = startup_config_path,
            "vios startup-config declared but no matching configmap file"
        );
    }
}
