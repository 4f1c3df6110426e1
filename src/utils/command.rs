//! Utilities for running commands with proper error handling and timeouts

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Run a command with optional timeout
///
/// The child is killed if the timeout elapses.
pub async fn run_command(
    program: &str,
    args: &[&str],
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!("Running command: {} {}", program, args.join(" "));

    let output = match timeout {
        Some(timeout_duration) => {
            match tokio::time::timeout(timeout_duration, cmd.output()).await {
                Ok(output) => output.with_context(|| format!("Failed to execute {}", program))?,
                Err(_) => anyhow::bail!("Command timed out after {:?}", timeout_duration),
            }
        }
        None => cmd
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", program))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command failed: {} {}", program, args.join(" "));
        error!("Stderr: {}", stderr);
        anyhow::bail!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout);
    }

    Ok(output)
}

/// Run a shell command (hooks, templates)
pub async fn run_shell_command(
    command: &str,
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<Output> {
    info!("Running shell command: {}", command);

    #[cfg(unix)]
    let (shell, flag) = ("sh", "-c");

    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");

    run_command(shell, &[flag, command], working_dir, timeout).await
}

/// Quote a value for safe interpolation into a `sh -c` command line
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_./:@%+=,-".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// Substitute `{name}` placeholders with shell-quoted values
///
/// One pass over the template: substituted text is never scanned again and
/// unknown placeholders are left as written.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match value {
            Some((close, value)) => {
                rendered.push_str(&shell_quote(value));
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}
