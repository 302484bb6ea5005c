use k8s_openapi::api::core::v1::{HostPathVolumeSource, Volume, VolumeMount};

use super::{existing_mount_paths, existing_volume_names, ApplyInput};

/// Translate the node's `host:container[:ro]` binds into HostPath volumes.
///
/// Only absolute host paths are translated; relative binds are node-file
/// material delivered through ConfigMaps instead. Colliding mount paths are
/// skipped in declaration order.
pub(super) fn apply_bind_mounts(input: &mut ApplyInput<'_>) {
    if input.node_def.binds.is_empty() {
        return;
    }

    let mut existing_mounts = existing_mount_paths(input.nos);
    let mut existing_volumes = existing_volume_names(input.deployment);

    let binds = input.node_def.binds.clone();
    for (idx, bind) in binds.iter().enumerate() {
        let bind = bind.trim();
        if bind.is_empty() {
            continue;
        }

        let mut parts = bind.splitn(3, ':');
        let host_path = parts.next().unwrap_or_default().trim();
        let Some(container_path) = parts.next().map(str::trim) else {
            continue;
        };
        if host_path.is_empty() || container_path.is_empty() {
            continue;
        }

        if !host_path.starts_with('/') {
            continue;
        }

        if existing_mounts.contains(container_path) {
            continue;
        }

        let read_only = parts
            .next()
            .map(|opts| opts.contains("ro"))
            .unwrap_or(false);

        let mut vol_name = format!("bind-{idx}");
        let mut dedup = 2;
        while existing_volumes.contains(&vol_name) {
            vol_name = format!("bind-{idx}-{dedup}");
            dedup += 1;
        }

        existing_volumes.insert(vol_name.clone());
        existing_mounts.insert(container_path.to_string());

        input
            .deployment
            .spec
            .get_or_insert_with(Default::default)
            .template
            .spec
            .get_or_insert_with(Default::default)
            .volumes
            .get_or_insert_with(Vec::new)
            .push(Volume {
                name: vol_name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: host_path.to_string(),
                    ..HostPathVolumeSource::default()
                }),
                ..Volume::default()
            });

        input
            .nos
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: vol_name,
                read_only: Some(read_only),
                mount_path: container_path.to_string(),
                ..VolumeMount::default()
            });
    }
}
