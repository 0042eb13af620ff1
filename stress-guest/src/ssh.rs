//! SSH execution primitives for reaching the guest.
//!
//! Uses `tokio::process::Command` to shell out to `ssh`. Keys must be
//! pre-configured; `BatchMode` keeps a missing key from prompting.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use stress_core::{CommandOutput, GuestChannel, GuestError, Session};
use thiserror::Error;

use crate::config::GuestConfig;

/// Errors from SSH operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// SSH command failed to execute (process spawn error).
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// SSH command returned non-zero exit code.
    #[error("ssh command failed on {host}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Command as sent.
        command: String,
        /// Exit code.
        exit_code: i32,
        /// Standard output.
        stdout: String,
        /// Standard error output.
        stderr: String,
    },
}

impl From<SshError> for GuestError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::Spawn(e) => GuestError::Transport(e.to_string()),
            SshError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
                ..
            } => GuestError::CommandFailed {
                command,
                status: exit_code,
                output: format!("{}{}", stdout, stderr),
            },
        }
    }
}

/// Result of executing a command via SSH.
#[derive(Debug, Clone)]
pub struct SshResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
}

impl SshResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Exit code `ssh` itself uses for connection-level failures.
const SSH_CONNECTION_ERROR: i32 = 255;

/// SSH endpoint of the guest.
#[derive(Debug, Clone)]
pub struct SshTarget {
    host: String,
    user: String,
    port: u16,
    identity_file: Option<std::path::PathBuf>,
    connect_timeout_secs: u64,
}

impl SshTarget {
    /// Build a target from the `[guest]` config.
    pub fn from_config(config: &GuestConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    /// Guest host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Arguments preceding the remote command.
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args
    }

    /// Execute a command on the guest via SSH.
    ///
    /// Returns the raw result including exit code, stdout, and stderr.
    /// Does NOT fail on non-zero exit; use `exec_ok` for that.
    pub async fn exec(&self, cmd: &str) -> Result<SshResult, SshError> {
        tracing::debug!("ssh {}@{}: {}", self.user, self.host, cmd);
        let output = tokio::process::Command::new("ssh")
            .args(self.args())
            .arg(cmd)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(SshResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Execute a command on the guest, failing on non-zero exit.
    pub async fn exec_ok(&self, cmd: &str) -> Result<SshResult, SshError> {
        let result = self.exec(cmd).await?;
        if !result.success() {
            return Err(SshError::CommandFailed {
                host: self.host.clone(),
                command: cmd.to_string(),
                exit_code: result.exit_code,
                stdout: result.stdout.clone(),
                stderr: result.stderr.clone(),
            });
        }
        Ok(result)
    }
}

/// Guest command channel over SSH.
#[derive(Debug, Clone)]
pub struct SshChannel {
    target: SshTarget,
}

impl SshChannel {
    /// Create a channel to `target`.
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl GuestChannel for SshChannel {
    async fn execute(&self, command: &str) -> Result<CommandOutput, GuestError> {
        let result = self.target.exec(command).await?;
        if result.exit_code == SSH_CONNECTION_ERROR {
            return Err(GuestError::Transport(format!(
                "ssh to {} failed: {}",
                self.target.host,
                result.stderr.trim()
            )));
        }
        Ok(CommandOutput {
            status: result.exit_code,
            output: result.stdout,
        })
    }
}

/// Logged-in session on the guest.
///
/// Each command runs over its own SSH connection; closing only stops the
/// session from accepting further commands.
#[derive(Debug)]
pub struct SshSession {
    target: SshTarget,
    closed: AtomicBool,
}

impl SshSession {
    /// Session on `target`. Callers are expected to have checked the login.
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            closed: AtomicBool::new(false),
        }
    }

    /// True once `close()` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for SshSession {
    async fn cmd(&self, command: &str) -> Result<String, GuestError> {
        if self.is_closed() {
            return Err(GuestError::SessionClosed);
        }
        let result = self.target.exec_ok(command).await?;
        Ok(result.stdout)
    }

    async fn close(&self) -> Result<(), GuestError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session to {} already closed", self.target.host);
        } else {
            tracing::debug!("Session to {} closed", self.target.host);
        }
        Ok(())
    }
}
