use super::ApplyInput;

/// Fallback command override from the node definition. Kind handlers that
/// already set a command (cEOS, IOL, linux) win.
pub(super) fn apply_command_override(input: &mut ApplyInput<'_>) {
    if input
        .nos
        .command
        .as_ref()
        .map(|c| !c.is_empty())
        .unwrap_or(false)
    {
        return;
    }

    let cmd = input.node_def.cmd.as_deref().unwrap_or_default().trim();
    if !cmd.is_empty() {
        input.nos.command = Some(vec!["sh".into(), "-c".into(), cmd.to_string()]);
        return;
    }

    let entrypoint = input
        .node_def
        .entrypoint
        .as_deref()
        .unwrap_or_default()
        .trim();
    if !entrypoint.is_empty() {
        input.nos.command = Some(vec!["sh".into(), "-c".into(), entrypoint.to_string()]);
    }
}
