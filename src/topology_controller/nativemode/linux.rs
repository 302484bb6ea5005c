use super::ApplyInput;

/// Plain linux nodes: run the declared command via `sh -c`; images without
/// one that are known to exit immediately when stdin is not attached get
/// `sleep infinity` so the node stays up for exec/config steps.
pub(super) fn apply_linux(input: &mut ApplyInput<'_>) {
    if !input.node_def.kind.eq_ignore_ascii_case("linux") {
        return;
    }

    let mut cmd = input
        .node_def
        .cmd
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();

    if cmd.is_empty() {
        let image = input.node_image.trim().to_lowercase();
        if image.contains("python") || image.contains("alpine") {
            cmd = "sleep infinity".to_string();
        }
    }

    if !cmd.is_empty() {
        input.nos.command = Some(vec!["sh".to_string(), "-c".to_string(), cmd]);
    }
}
