//! Connection settings for the guest (`[guest]`), the QEMU monitor
//! (`[monitor]`) and the workload runner (`[runner]`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// SSH access to the guest.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestConfig {
    /// Guest address.
    pub host: String,
    /// SSH username (default: Administrator).
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key; the SSH agent/config is used when absent.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// SSH connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds between login attempts (default: 5).
    #[serde(default = "default_login_poll_interval_secs")]
    pub login_poll_interval_secs: u64,
    /// Seconds to wait for the guest to go down on reboot (default: 600).
    #[serde(default = "default_reboot_timeout_secs")]
    pub reboot_timeout_secs: u64,
}

/// QEMU monitor access and balloon policy.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Path of the QMP unix socket.
    pub qmp_socket: PathBuf,
    /// Guest memory in MB; queried from the balloon device when absent.
    #[serde(default)]
    pub mem_mb: Option<u64>,
    /// Lowest balloon target in MB (default: 512).
    #[serde(default = "default_min_mem_mb")]
    pub min_mem_mb: u64,
    /// Headroom added to the probed floor in MB (default: 300).
    #[serde(default = "default_balloon_buffer_mb")]
    pub balloon_buffer_mb: u64,
    /// Seconds to wait for the balloon to settle (default: 900).
    #[serde(default = "default_balloon_timeout_secs")]
    pub balloon_timeout_secs: u64,
    /// Seconds between balloon size readings (default: 5).
    #[serde(default = "default_settle_interval_secs")]
    pub settle_interval_secs: u64,
    /// Accepted relative deviation of the settled size (default: 0.05).
    #[serde(default = "default_tolerance_ratio")]
    pub tolerance_ratio: f64,
    /// Probe the guest's floor by deflating fully first (default: true).
    #[serde(default = "default_probe_floor")]
    pub probe_floor: bool,
    /// Timeout for a single QMP command in seconds (default: 30).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Guest command that runs the workload (`[runner]`).
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Command template; `{video_test}` is replaced by the sub-test name.
    #[serde(default = "default_runner_command")]
    pub command: String,
}

// Default value functions
fn default_user() -> String {
    "Administrator".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_login_poll_interval_secs() -> u64 {
    5
}

fn default_reboot_timeout_secs() -> u64 {
    600
}

fn default_min_mem_mb() -> u64 {
    512
}

fn default_balloon_buffer_mb() -> u64 {
    300
}

fn default_balloon_timeout_secs() -> u64 {
    900
}

fn default_settle_interval_secs() -> u64 {
    5
}

fn default_tolerance_ratio() -> f64 {
    0.05
}

fn default_probe_floor() -> bool {
    true
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_runner_command() -> String {
    "{video_test}".to_string()
}

impl GuestConfig {
    /// Guest config with defaults for everything but the host.
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            user: default_user(),
            port: default_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            login_poll_interval_secs: default_login_poll_interval_secs(),
            reboot_timeout_secs: default_reboot_timeout_secs(),
        }
    }

    /// Interval between login attempts.
    pub fn login_poll_interval(&self) -> Duration {
        Duration::from_secs(self.login_poll_interval_secs.max(1))
    }

    /// Reboot shutdown wait.
    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }
}

impl MonitorConfig {
    /// Monitor config with defaults for everything but the socket path.
    pub fn new(qmp_socket: impl Into<PathBuf>) -> Self {
        Self {
            qmp_socket: qmp_socket.into(),
            mem_mb: None,
            min_mem_mb: default_min_mem_mb(),
            balloon_buffer_mb: default_balloon_buffer_mb(),
            balloon_timeout_secs: default_balloon_timeout_secs(),
            settle_interval_secs: default_settle_interval_secs(),
            tolerance_ratio: default_tolerance_ratio(),
            probe_floor: default_probe_floor(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }

    /// Balloon settle window.
    pub fn balloon_timeout(&self) -> Duration {
        Duration::from_secs(self.balloon_timeout_secs)
    }

    /// Interval between balloon size readings.
    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_secs.max(1))
    }

    /// Timeout for one QMP command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
        }
    }
}

impl RunnerConfig {
    /// Guest command for `video_test`.
    pub fn command_for(&self, video_test: &str) -> String {
        self.command.replace("{video_test}", video_test)
    }
}
