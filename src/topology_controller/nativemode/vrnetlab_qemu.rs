use k8s_openapi::api::core::v1::SecurityContext;

use super::{existing_mount_paths, mount_config_map_file_at, upsert_env, ApplyInput};

/// Generic handling for vrnetlab QEMU-based images (anything whose image
/// path contains `/vrnetlab/`, except IOL which runs a bare process).
pub(super) fn apply_vrnetlab_qemu(input: &mut ApplyInput<'_>) {
    let kind = input.node_def.kind.trim().to_lowercase();
    if kind.is_empty() {
        return;
    }

    let image = input.node_image.trim().to_lowercase();
    if image.is_empty() || !image.contains("/vrnetlab/") {
        return;
    }

    if kind == "cisco_iol" || kind == "cisco_ioll2" {
        return;
    }

    // vrnetlab expects its startup config at a fixed path; without the mount
    // the VM boots with only the internal bootstrap config and the generated
    // node configuration never applies.
    let startup_config_path = input
        .node_def
        .startup_config
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();
    if !startup_config_path.is_empty() {
        let mut existing_mounts = existing_mount_paths(input.nos);
        mount_config_map_file_at(
            input,
            &mut existing_mounts,
            &startup_config_path,
            "/config/startup-config.cfg",
        );
    }

    // Management stays on the pod network; passthrough mode would need tap
    // creation and tc inside the NOS container.
    upsert_env(input.nos, "CLAB_MGMT_PASSTHROUGH", "false");

    // Dataplane interface count: the highest ethN index among this node's
    // endpoints. vrnetlab wires QEMU NICs to eth1..ethN based on it.
    let intfs = max_eth_index(input);
    if intfs > 0 {
        upsert_env(input.nos, "CLAB_INTFS", &intfs.to_string());
    }

    // QEMU needs to create TAPs and attach them to the pod's veth endpoints;
    // the standard vrnetlab workflow is a privileged container.
    input.nos.security_context = Some(SecurityContext {
        privileged: Some(true),
        run_as_user: Some(0),
        allow_privilege_escalation: Some(true),
        ..SecurityContext::default()
    });
}

fn max_eth_index(input: &ApplyInput<'_>) -> u32 {
    let mut max = 0;
    for endpoint in input.links {
        let name = endpoint.local_interface.trim();
        let base = name.split('.').next().unwrap_or_default();
        let Some(index) = base.strip_prefix("eth") else {
            continue;
        };
        if let Ok(index) = index.parse::<u32>() {
            if index > 0 && index > max {
                max = index;
            }
        }
    }
    max
}
