//! Typed stress and workload configuration.
//!
//! Both sections are deserialized from the `[stress]` and `[workload]` tables
//! of the run's TOML file and validated once before any guest interaction.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ConfigError;

/// Stress loop configuration (`[stress]`).
#[derive(Debug, Clone, Deserialize)]
pub struct StressConfig {
    /// Number of stress iterations (default: 500).
    #[serde(default = "default_repeat_times")]
    pub repeat_times: u32,
    /// Seconds the workload may run before it is restarted (default: 240).
    #[serde(default = "default_time_for_video")]
    pub time_for_video: f64,
    /// Seconds to wait for guest login (default: 360).
    #[serde(default = "default_login_timeout")]
    pub login_timeout: f64,
    /// Driver to put under driver verifier before the loop.
    pub driver_name: String,
    /// Seed for balloon target selection; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Workload configuration (`[workload]`).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Regex identifying the workload in a process listing (default: "test").
    #[serde(default = "default_target_process")]
    pub target_process: String,
    /// Command listing guest processes (default: "tasklist").
    #[serde(default = "default_check_running_cmd")]
    pub check_running_cmd: String,
    /// Workload sub-test launched in the background.
    pub video_test: String,
    /// Cleanup command template; `{process}` is replaced by the matched token.
    #[serde(default = "default_clean_cmd")]
    pub clean_cmd: String,
    /// Seconds between start confirmation polls (default: 10).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Start confirmation window in seconds (default: 240).
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

// Default value functions
fn default_repeat_times() -> u32 {
    500
}

fn default_time_for_video() -> f64 {
    240.0
}

fn default_login_timeout() -> f64 {
    360.0
}

fn default_target_process() -> String {
    "test".to_string()
}

fn default_check_running_cmd() -> String {
    "tasklist".to_string()
}

fn default_clean_cmd() -> String {
    r#"del /f /s "{process}""#.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_start_timeout_secs() -> u64 {
    240
}

impl StressConfig {
    /// Stress config with defaults for everything but the driver name.
    pub fn new(driver_name: &str) -> Self {
        Self {
            repeat_times: default_repeat_times(),
            time_for_video: default_time_for_video(),
            login_timeout: default_login_timeout(),
            driver_name: driver_name.to_string(),
            seed: None,
        }
    }

    /// Reject values the stress loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repeat_times == 0 {
            return Err(invalid("repeat_times", "must be at least 1"));
        }
        if Duration::try_from_secs_f64(self.time_for_video).is_err() {
            return Err(invalid(
                "time_for_video",
                format!("must be a non-negative number of seconds, got {}", self.time_for_video),
            ));
        }
        if self.login_timeout <= 0.0 || Duration::try_from_secs_f64(self.login_timeout).is_err() {
            return Err(invalid(
                "login_timeout",
                format!("must be a positive number of seconds, got {}", self.login_timeout),
            ));
        }
        if self.driver_name.trim().is_empty() {
            return Err(invalid("driver_name", "must not be empty"));
        }
        Ok(())
    }

    /// Workload restart threshold. Saturates for values `validate()` rejects.
    pub fn video_budget(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_for_video).unwrap_or(Duration::MAX)
    }

    /// Login wait. Saturates for values `validate()` rejects.
    pub fn login_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.login_timeout).unwrap_or(Duration::MAX)
    }
}

impl WorkloadConfig {
    /// Workload config with defaults for everything but the sub-test.
    pub fn new(video_test: &str) -> Self {
        Self {
            target_process: default_target_process(),
            check_running_cmd: default_check_running_cmd(),
            video_test: video_test.to_string(),
            clean_cmd: default_clean_cmd(),
            poll_interval_secs: default_poll_interval_secs(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }

    /// Reject values the workload controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.video_test.trim().is_empty() {
            return Err(invalid("video_test", "must not be empty"));
        }
        if self.check_running_cmd.trim().is_empty() {
            return Err(invalid("check_running_cmd", "must not be empty"));
        }
        if self.target_process.is_empty() {
            return Err(invalid("target_process", "must not be empty"));
        }
        if !self.clean_cmd.contains("{process}") {
            return Err(invalid("clean_cmd", "must contain the {process} placeholder"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "must be at least 1"));
        }
        if self.poll_interval_secs > self.start_timeout_secs {
            return Err(invalid(
                "poll_interval_secs",
                format!(
                    "{}s exceeds start_timeout_secs ({}s)",
                    self.poll_interval_secs, self.start_timeout_secs
                ),
            ));
        }
        self.process_pattern()?;
        Ok(())
    }

    /// Compile `target_process` as a case-insensitive, multi-line regex.
    pub fn process_pattern(&self) -> Result<Regex, ConfigError> {
        Ok(RegexBuilder::new(&self.target_process)
            .case_insensitive(true)
            .multi_line(true)
            .build()?)
    }

    /// Cleanup command for a matched process token.
    pub fn clean_command(&self, process: &str) -> String {
        self.clean_cmd.replace("{process}", process)
    }

    /// Interval between start confirmation polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Start confirmation window.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stress_defaults() {
        let config = StressConfig::new("balloon");
        assert_eq!(config.repeat_times, 500);
        assert_eq!(config.video_budget(), Duration::from_secs(240));
        assert_eq!(config.login_wait(), Duration::from_secs(360));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stress_from_toml_uses_defaults() {
        let config: StressConfig = toml::from_str(r#"driver_name = "balloon""#).unwrap();
        assert_eq!(config.repeat_times, 500);
        assert_eq!(config.time_for_video, 240.0);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn stress_rejects_zero_iterations() {
        let mut config = StressConfig::new("balloon");
        config.repeat_times = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repeat_times"));
    }

    #[test]
    fn stress_accepts_zero_video_budget() {
        let mut config = StressConfig::new("balloon");
        config.time_for_video = 0.0;
        assert!(config.validate().is_ok());

        config.time_for_video = -1.0;
        assert!(config.validate().is_err());

        config.time_for_video = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn stress_rejects_durations_too_large_to_represent() {
        let mut config = StressConfig::new("balloon");
        config.time_for_video = 1e20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "time_for_video", .. })
        ));
        assert_eq!(config.video_budget(), Duration::MAX);

        let mut config = StressConfig::new("balloon");
        config.login_timeout = 1e20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "login_timeout", .. })
        ));
    }

    #[test]
    fn stress_rejects_empty_driver() {
        let config = StressConfig::new("  ");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "driver_name", .. })
        ));
    }

    #[test]
    fn workload_defaults() {
        let config = WorkloadConfig::new("win_video_play");
        assert_eq!(config.target_process, "test");
        assert_eq!(config.check_running_cmd, "tasklist");
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.start_timeout(), Duration::from_secs(240));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn workload_pattern_is_case_insensitive() {
        let mut config = WorkloadConfig::new("win_video_play");
        config.target_process = r"wmplayer\.exe".into();
        let pattern = config.process_pattern().unwrap();
        assert!(pattern.is_match("WMPlayer.EXE    4242 Console"));
    }

    #[test]
    fn workload_rejects_bad_pattern() {
        let mut config = WorkloadConfig::new("win_video_play");
        config.target_process = "(unclosed".into();
        assert!(matches!(config.validate(), Err(ConfigError::Pattern(_))));
    }

    #[test]
    fn workload_rejects_interval_longer_than_window() {
        let mut config = WorkloadConfig::new("win_video_play");
        config.poll_interval_secs = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn clean_command_substitutes_process() {
        let config = WorkloadConfig::new("win_video_play");
        assert_eq!(
            config.clean_command("wmplayer.exe"),
            r#"del /f /s "wmplayer.exe""#
        );
    }
}
