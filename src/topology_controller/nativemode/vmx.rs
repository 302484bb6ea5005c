use super::{upsert_env, ApplyInput};

/// vMX runs under QEMU. Management stays on the pod network (passthrough
/// would need tap+tc rights the native security model does not grant), and
/// the image is told the credentials and datapath mode the rest of the
/// tooling assumes.
pub(super) fn apply_juniper_vmx(input: &mut ApplyInput<'_>) {
    upsert_env(input.nos, "CLAB_MGMT_PASSTHROUGH", "false");

    let args = input.nos.args.get_or_insert_with(Vec::new);

    let node_name = input.node_name.trim();
    if !args.iter().any(|a| a == "--hostname") && !node_name.is_empty() {
        args.push("--hostname".into());
        args.push(node_name.to_string());
    }
    if !args.iter().any(|a| a == "--username") {
        args.push("--username".into());
        args.push("admin".into());
    }
    if !args.iter().any(|a| a == "--password") {
        args.push("--password".into());
        args.push("admin@123".into());
    }

    // Some image versions emit QEMU args referencing an undefined netdev in
    // other connection modes; tc matches the tap wiring the launcher builds.
    if !args.iter().any(|a| a == "--connection-mode" || a == "--connectionMode") {
        args.push("--connection-mode".into());
        args.push("tc".into());
    }
}
