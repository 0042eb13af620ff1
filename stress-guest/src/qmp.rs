//! Minimal QMP (QEMU Machine Protocol) client.
//!
//! Each command opens its own connection to the monitor socket, performs
//! the capabilities handshake and reads replies until the command's
//! `return` or `error` arrives. Asynchronous events are skipped.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stress_core::{BalloonError, GuestError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Errors from the QMP monitor.
#[derive(Debug, Error)]
pub enum QmpError {
    /// Socket I/O failed.
    #[error("qmp i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A message was not valid JSON.
    #[error("qmp json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The monitor broke the protocol (missing greeting, unexpected reply, EOF).
    #[error("qmp protocol error: {0}")]
    Protocol(String),

    /// The monitor rejected the command.
    #[error("qmp command `{command}` failed: {class}: {desc}")]
    Command {
        /// Command name.
        command: String,
        /// QMP error class.
        class: String,
        /// Human-readable description.
        desc: String,
    },

    /// No reply within the command timeout.
    #[error("qmp command `{command}` timed out after {waited:?}")]
    Timeout {
        /// Command name.
        command: String,
        /// Timeout applied.
        waited: Duration,
    },
}

impl From<QmpError> for BalloonError {
    fn from(e: QmpError) -> Self {
        BalloonError::Monitor(e.to_string())
    }
}

impl From<QmpError> for GuestError {
    fn from(e: QmpError) -> Self {
        GuestError::Transport(e.to_string())
    }
}

/// Client for a QMP unix socket.
#[derive(Debug, Clone)]
pub struct QmpClient {
    socket: PathBuf,
    timeout: Duration,
}

impl QmpClient {
    /// Client for the monitor at `socket`; each command is bounded by `timeout`.
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    /// Monitor socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Execute `command` and return its `return` value.
    pub async fn execute(&self, command: &str, arguments: Option<Value>) -> Result<Value, QmpError> {
        tracing::debug!("qmp {}: {} {:?}", self.socket.display(), command, arguments);
        match tokio::time::timeout(self.timeout, self.exchange(command, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(QmpError::Timeout {
                command: command.to_string(),
                waited: self.timeout,
            }),
        }
    }

    /// Run state reported by `query-status` (e.g. "running", "paused").
    pub async fn query_status(&self) -> Result<String, QmpError> {
        let reply = self.execute("query-status", None).await?;
        reply
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| QmpError::Protocol(format!("query-status without status: {}", reply)))
    }

    /// Current guest memory in bytes as seen by the balloon device.
    pub async fn query_balloon(&self) -> Result<u64, QmpError> {
        let reply = self.execute("query-balloon", None).await?;
        reply
            .get("actual")
            .and_then(Value::as_u64)
            .ok_or_else(|| QmpError::Protocol(format!("query-balloon without actual: {}", reply)))
    }

    /// Request a new balloon size in bytes.
    pub async fn balloon(&self, bytes: u64) -> Result<(), QmpError> {
        self.execute("balloon", Some(json!({ "value": bytes })))
            .await
            .map(|_| ())
    }

    async fn exchange(&self, command: &str, arguments: Option<Value>) -> Result<Value, QmpError> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let greeting = next_message(&mut lines).await?;
        if greeting.get("QMP").is_none() {
            return Err(QmpError::Protocol(format!("unexpected greeting: {}", greeting)));
        }

        send(&mut write, &json!({ "execute": "qmp_capabilities" })).await?;
        read_return(&mut lines, "qmp_capabilities").await?;

        let mut request = json!({ "execute": command });
        if let Some(arguments) = arguments {
            request["arguments"] = arguments;
        }
        send(&mut write, &request).await?;
        read_return(&mut lines, command).await
    }
}

async fn send(write: &mut OwnedWriteHalf, message: &Value) -> Result<(), QmpError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    write.write_all(&line).await?;
    write.flush().await?;
    Ok(())
}

async fn next_message(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<Value, QmpError> {
    loop {
        match lines.next_line().await? {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => return Ok(serde_json::from_str(&line)?),
            None => return Err(QmpError::Protocol("monitor closed the connection".into())),
        }
    }
}

async fn read_return(
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    command: &str,
) -> Result<Value, QmpError> {
    loop {
        let message = next_message(lines).await?;
        if let Some(event) = message.get("event") {
            tracing::trace!("qmp event: {}", event);
            continue;
        }
        if let Some(value) = message.get("return") {
            return Ok(value.clone());
        }
        if let Some(error) = message.get("error") {
            let field = |name: &str| {
                error
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Err(QmpError::Command {
                command: command.to_string(),
                class: field("class"),
                desc: field("desc"),
            });
        }
        return Err(QmpError::Protocol(format!("unexpected reply: {}", message)));
    }
}
