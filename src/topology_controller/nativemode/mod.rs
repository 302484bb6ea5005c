//! Native-mode pod-spec overrides.
//!
//! Native mode runs the NOS image directly as a Kubernetes container. Images
//! built for a Docker workflow often need extra pod-spec plumbing to boot and
//! stay reachable; each supported kind gets a handler here. The engine is a
//! pure function over the deployment under construction -- it never performs
//! link plumbing (that is the launcher's job inside the pod). It may:
//! - ensure required env vars are set for a NOS to boot,
//! - mount startup-config or runtime artifacts expected by a NOS entrypoint,
//! - override the container command where native mode requires it.

mod binds;
mod ceos;
mod cmd;
mod env;
mod iol;
mod linux;
mod vios;
mod vmx;
mod vrnetlab_qemu;

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, Volume, VolumeMount,
};

pub use iol::iol_pid_and_nvram;

use crate::crd::{FileFromConfigMap, NodeDefinition, Topology};
use crate::topology_controller::configs::LinkEndpoint;
use crate::util::kubernetes::config_map_volume_name;

/// Inputs for applying native-mode overrides to one node deployment.
pub struct ApplyInput<'a> {
    pub owning_topology: &'a Topology,
    pub node_name: &'a str,
    pub node_image: &'a str,
    pub node_def: &'a NodeDefinition,
    /// This node's link endpoints, ordered by link index.
    pub links: &'a [LinkEndpoint],
    pub files_from_config_map: &'a [FileFromConfigMap],
    /// The deployment under construction (volumes may be appended).
    pub deployment: &'a mut Deployment,
    /// The NOS container under construction (not yet inserted into the
    /// deployment's container list).
    pub nos: &'a mut Container,
}

/// Apply all native-mode compatibility changes for a node, in order: generic
/// env passthrough, linux command fixup, bind mounts, the kind handler, the
/// generic vrnetlab-QEMU handler, and the command-override fallback. The env
/// list ends up sorted by name so rendered deployments diff stably.
pub fn apply_native_mode_overrides(input: &mut ApplyInput<'_>) {
    let kind = input.node_def.kind.trim().to_lowercase();
    if kind.is_empty() {
        return;
    }

    env::apply_env_map(input);
    linux::apply_linux(input);
    binds::apply_bind_mounts(input);

    match kind.as_str() {
        "ceos" | "eos" => ceos::apply_ceos(input),
        "cisco_iol" => iol::apply_cisco_iol(input),
        "cisco_vios" | "cisco_viosl2" => vios::apply_cisco_vios(input),
        "vr-vmx" => vmx::apply_juniper_vmx(input),
        _ => {
            // other kinds are handled by the generic paths below or need no
            // special native-mode changes
        }
    }

    vrnetlab_qemu::apply_vrnetlab_qemu(input);

    cmd::apply_command_override(input);

    sort_env(input.nos);
}

pub(crate) fn sort_env(container: &mut Container) {
    if let Some(env) = container.env.as_mut() {
        env.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

pub(crate) fn existing_mount_paths(container: &Container) -> BTreeSet<String> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .map(|vm| vm.mount_path.trim().to_string())
        .collect()
}

pub(crate) fn existing_volume_names(deployment: &Deployment) -> BTreeSet<String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.volumes.as_ref())
        .map(|vols| vols.iter().map(|v| v.name.clone()).collect())
        .unwrap_or_default()
}

pub(crate) fn upsert_env(container: &mut Container, key: &str, value: &str) {
    let key = key.trim();
    if key.is_empty() {
        return;
    }

    let env = container.env.get_or_insert_with(Vec::new);
    for entry in env.iter_mut() {
        if entry.name.trim() == key {
            entry.value = Some(value.to_string());
            entry.value_from = None;
            return;
        }
    }

    env.push(EnvVar {
        name: key.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    });
}

pub(crate) fn remove_env(container: &mut Container, key: &str) {
    if let Some(env) = container.env.as_mut() {
        env.retain(|e| e.name.trim() != key);
    }
}

pub(crate) fn env_value(container: &Container, key: &str) -> Option<String> {
    container
        .env
        .iter()
        .flatten()
        .find(|e| e.name.trim() == key)
        .and_then(|e| e.value.clone())
}

fn pod_volumes_mut(deployment: &mut Deployment) -> &mut Vec<Volume> {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
        .volumes
        .get_or_insert_with(Vec::new)
}

/// Add an emptyDir-backed mount to the NOS container, creating the volume if
/// the pod does not have it yet. No-op when the mount path is taken.
pub(crate) fn ensure_empty_dir_mount(
    input: &mut ApplyInput<'_>,
    existing_mounts: &mut BTreeSet<String>,
    existing_volumes: &mut BTreeSet<String>,
    vol_name: &str,
    mount_path: &str,
    medium: Option<&str>,
) {
    let vol_name = vol_name.trim();
    let mount_path = mount_path.trim();
    if vol_name.is_empty() || mount_path.is_empty() || existing_mounts.contains(mount_path) {
        return;
    }

    if !existing_volumes.contains(vol_name) {
        pod_volumes_mut(input.deployment).push(Volume {
            name: vol_name.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: medium.map(str::to_string),
                ..EmptyDirVolumeSource::default()
            }),
            ..Volume::default()
        });
        existing_volumes.insert(vol_name.to_string());
    }

    input
        .nos
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: vol_name.to_string(),
            mount_path: mount_path.to_string(),
            ..VolumeMount::default()
        });
    existing_mounts.insert(mount_path.to_string());
}

/// Mount a file projected from a ConfigMap into the NOS container at a fixed
/// path, locating the source entry by its declared in-pod file path. The
/// volume itself is rendered with the rest of the pod volumes; only the NOS
/// mount is added here. Returns false when no matching entry exists.
pub(crate) fn mount_config_map_file_at(
    input: &mut ApplyInput<'_>,
    existing_mounts: &mut BTreeSet<String>,
    source_file_path: &str,
    mount_path: &str,
) -> bool {
    if existing_mounts.contains(mount_path) {
        return true;
    }

    for file in input.files_from_config_map {
        if file.config_map_name.trim().is_empty() || file.config_map_path.trim().is_empty() {
            continue;
        }

        if file.file_path.trim() != source_file_path {
            continue;
        }

        let volume_name =
            config_map_volume_name(&file.config_map_name, &file.config_map_path);

        input
            .nos
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: volume_name,
                read_only: Some(true),
                mount_path: mount_path.to_string(),
                sub_path: Some(file.config_map_path.clone()),
                ..VolumeMount::default()
            });
        existing_mounts.insert(mount_path.to_string());

        return true;
    }

    false
}

#[cfg(test)]
mod tests;
