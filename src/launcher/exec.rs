//! Subprocess plumbing for `ip`, `tc`, and `ethtool`.

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Run a tool to completion, returning stdout. Non-zero exit becomes an
/// external-tool error carrying the command line and stderr.
pub async fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "exec");

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(Error::IoError)?;

    if !output.status.success() {
        return Err(Error::ExternalToolError(format!(
            "{program} {} failed ({}): {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a tool purely for its exit status.
pub async fn tool_succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// True iff a link with this name exists in the pod netns.
pub async fn link_exists(name: &str) -> bool {
    tool_succeeds("ip", &["link", "show", "dev", name]).await
}
