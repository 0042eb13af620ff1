//! Run configuration file for balloon-stress.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use stress_core::{StressConfig, WorkloadConfig};
use stress_guest::{GuestConfig, MonitorConfig, RunnerConfig};

/// Whole run configuration, one table per concern.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Stress loop settings.
    pub stress: StressConfig,
    /// Background workload settings.
    pub workload: WorkloadConfig,
    /// SSH access to the guest.
    pub guest: GuestConfig,
    /// QEMU monitor and balloon policy.
    pub monitor: MonitorConfig,
    /// Workload launch command.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub repeat_times: Option<u32>,
    pub time_for_video: Option<f64>,
    pub seed: Option<u64>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(repeat_times) = overrides.repeat_times {
            self.stress.repeat_times = repeat_times;
        }
        if let Some(time_for_video) = overrides.time_for_video {
            self.stress.time_for_video = time_for_video;
        }
        if let Some(seed) = overrides.seed {
            self.stress.seed = Some(seed);
        }
    }

    /// Validate everything that can be checked without touching the guest.
    pub fn validate(&self) -> Result<()> {
        self.stress.validate().context("[stress]")?;
        self.workload.validate().context("[workload]")?;
        if self.guest.host.trim().is_empty() {
            anyhow::bail!("[guest]: host must not be empty");
        }
        let ratio = self.monitor.tolerance_ratio;
        if !ratio.is_finite() || ratio < 0.0 {
            anyhow::bail!("[monitor]: tolerance_ratio must be >= 0, got {}", ratio);
        }
        Ok(())
    }
}
