// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host-level shell side channel.

use pybridge_error::BridgeError;
use pybridge_protocol::ShellOutput;
use tokio::process::Command;
use tracing::debug;

/// Run `command` through the platform shell and capture its output.
pub(crate) async fn exec_shell(command: &str) -> Result<ShellOutput, BridgeError> {
    debug!(target: "pybridge.shell", %command, "exec_shell");

    #[cfg(windows)]
    let output = Command::new("cmd").arg("/C").arg(command).output().await;
    #[cfg(not(windows))]
    let output = Command::new("sh").arg("-c").arg(command).output().await;

    let output =
        output.map_err(|e| BridgeError::Transport(format!("failed to run shell: {e}")))?;

    Ok(ShellOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = exec_shell("echo hello").await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 0);
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn captures_stderr_and_failure_code() {
        let out = exec_shell("echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
    }
}
