use super::{upsert_env, ApplyInput};

/// Pass the node definition's env map through to the NOS container.
/// Upserts so a re-applied override never duplicates entries.
pub(super) fn apply_env_map(input: &mut ApplyInput<'_>) {
    if input.node_def.env.is_empty() {
        return;
    }

    let env = input.node_def.env.clone();
    for (k, v) in &env {
        upsert_env(input.nos, k, v);
    }
}
