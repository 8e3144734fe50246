//! Shell command execution with injection-safe quoting.
//!
//! Every interface, address and MAC string that reaches a command line
//! goes through [`shellquote`]; the values originate in the data store
//! and are not trusted.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{NetpolError, NetpolResult};

/// Path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `sysctl` command.
pub const SYSCTL_CMD: &str = "/sbin/sysctl";

/// Path to the `iptables-restore` command.
pub const IPTABLES_RESTORE_CMD: &str = "/sbin/iptables-restore";

/// Path to the `ip6tables-restore` command.
pub const IP6TABLES_RESTORE_CMD: &str = "/sbin/ip6tables-restore";

/// Path to the `iptables` command.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Path to the `ip6tables` command.
pub const IP6TABLES_CMD: &str = "/sbin/ip6tables";

/// Characters needing escapes inside shell double-quotes:
/// $, `, ", \ and newline.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Quotes a string for safe interpolation into a shell command line.
///
/// Wraps the value in double quotes and escapes the characters the
/// shell treats specially inside them.
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code (0 = success).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined stdout and stderr for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a command line through `/bin/sh -c`.
pub async fn exec(cmd: &str) -> NetpolResult<ExecResult> {
    exec_with_input(cmd, None).await
}

/// Executes a command line, optionally feeding `input` to its stdin.
///
/// The stdin variant exists for `iptables-restore`, which takes its
/// rule program on standard input.
pub async fn exec_with_input(cmd: &str, input: Option<&str>) -> NetpolResult<ExecResult> {
    tracing::debug!(command = %cmd, "executing shell command");

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| NetpolError::shell_exec(cmd, e.to_string()))?;

    if let Some(input) = input {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NetpolError::shell_exec(cmd, "stdin unavailable"))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| NetpolError::shell_exec(cmd, e.to_string()))?;
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| NetpolError::shell_exec(cmd, e.to_string()))?;

    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }

    Ok(result)
}

/// Executes a command line and converts a non-zero exit into an error.
pub async fn exec_or_throw(cmd: &str) -> NetpolResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(NetpolError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
