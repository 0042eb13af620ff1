//! Error types for balloon stress runs.

use std::time::Duration;

/// Errors raised by guest-side collaborators (command channel, session, VM handle).
#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    /// The transport to the guest failed before the command ran.
    #[error("guest transport error: {0}")]
    Transport(String),

    /// A command that must succeed returned a non-zero status.
    #[error("guest command `{command}` failed: status={status}, output={output}")]
    CommandFailed {
        /// Command as sent to the guest.
        command: String,
        /// Exit status.
        status: i32,
        /// Captured output.
        output: String,
    },

    /// The guest is not alive.
    #[error("guest is not alive: {0}")]
    NotAlive(String),

    /// Timed out waiting for a guest condition.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// How long we waited.
        waited: Duration,
    },

    /// Command issued on a session that was already closed.
    #[error("session already closed")]
    SessionClosed,

    /// Driver verifier could not be enabled for the driver.
    #[error("driver verifier not enabled for {driver}")]
    VerifierNotEnabled {
        /// Driver name.
        driver: String,
    },
}

/// Errors raised by a balloon controller.
#[derive(Debug, thiserror::Error)]
pub enum BalloonError {
    /// The memory boundary is unusable.
    #[error("invalid memory boundary: min={min} MB > max={max} MB")]
    InvalidBoundary {
        /// Lower bound in MB.
        min: u64,
        /// Upper bound in MB.
        max: u64,
    },

    /// The monitor rejected or failed the request.
    #[error("balloon monitor error: {0}")]
    Monitor(String),

    /// The balloon did not settle in time.
    #[error("balloon did not settle within {waited:?} (target {target} MB)")]
    NotSettled {
        /// Requested target in MB.
        target: u64,
        /// How long we waited.
        waited: Duration,
    },

    /// The balloon settled too far from the requested size.
    #[error("balloon settled at {actual} MB, expected {target} MB")]
    Mismatch {
        /// Requested target in MB.
        target: u64,
        /// Settled size in MB.
        actual: u64,
    },
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field name as written in the config file.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The target process pattern is not a valid regex.
    #[error("invalid target_process pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Phase of a stress run in which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configuration validation.
    Config,
    /// Initial liveness check.
    Boot,
    /// Guest login.
    Login,
    /// Driver verifier setup.
    DriverVerifier,
    /// Workload start / restart.
    Start,
    /// Memory boundary resolution.
    Boundary,
    /// Balloon adjustment.
    Adjustment,
    /// Post-loop liveness check.
    FinalLiveness,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Config => write!(f, "config"),
            Phase::Boot => write!(f, "boot"),
            Phase::Login => write!(f, "login"),
            Phase::DriverVerifier => write!(f, "driver verifier"),
            Phase::Start => write!(f, "start"),
            Phase::Boundary => write!(f, "memory boundary"),
            Phase::Adjustment => write!(f, "adjustment"),
            Phase::FinalLiveness => write!(f, "final liveness"),
        }
    }
}

/// Fatal errors of a stress run. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    /// Configuration rejected before the run started.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Guest was not alive before the run.
    #[error("guest not alive at start: {0}")]
    Boot(#[source] GuestError),

    /// Login to the guest failed.
    #[error("guest login failed: {0}")]
    Login(#[source] GuestError),

    /// Driver verifier setup failed.
    #[error("driver verifier setup failed for {driver}: {source}")]
    DriverVerifier {
        /// Driver name.
        driver: String,
        /// Underlying guest error.
        source: GuestError,
    },

    /// The workload never became observable as running.
    #[error("workload {sub_test} did not start within {waited:?}")]
    WorkloadNotStarted {
        /// Workload sub-test name.
        sub_test: String,
        /// Confirmation window.
        waited: Duration,
    },

    /// A process listing or cleanup command failed.
    #[error("workload control failed: {0}")]
    Workload(#[source] GuestError),

    /// The memory boundary could not be resolved.
    #[error("memory boundary resolution failed: {0}")]
    Boundary(#[source] BalloonError),

    /// A balloon adjustment failed.
    #[error("balloon adjustment to {target} MB failed at iteration {iteration}: {source}")]
    Adjustment {
        /// Loop iteration index.
        iteration: u32,
        /// Requested target in MB.
        target: u64,
        /// Underlying balloon error.
        source: BalloonError,
    },

    /// The guest was not alive after the loop.
    #[error("guest not alive after stress loop: {0}")]
    Liveness(#[source] GuestError),
}

impl StressError {
    /// The phase this error belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            StressError::Config(_) => Phase::Config,
            StressError::Boot(_) => Phase::Boot,
            StressError::Login(_) => Phase::Login,
            StressError::DriverVerifier { .. } => Phase::DriverVerifier,
            StressError::WorkloadNotStarted { .. } | StressError::Workload(_) => Phase::Start,
            StressError::Boundary(_) => Phase::Boundary,
            StressError::Adjustment { .. } => Phase::Adjustment,
            StressError::Liveness(_) => Phase::FinalLiveness,
        }
    }
}

/// Result type alias for stress operations.
pub type Result<T> = std::result::Result<T, StressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_failed_stage() {
        let err = StressError::WorkloadNotStarted {
            sub_test: "win_video_play".into(),
            waited: Duration::from_secs(240),
        };
        assert_eq!(err.phase(), Phase::Start);
        assert_eq!(err.phase().to_string(), "start");

        let err = StressError::Adjustment {
            iteration: 7,
            target: 2048,
            source: BalloonError::Monitor("device not found".into()),
        };
        assert_eq!(err.phase(), Phase::Adjustment);
        assert!(err.to_string().contains("iteration 7"));

        let err = StressError::Liveness(GuestError::NotAlive("paused".into()));
        assert_eq!(err.phase().to_string(), "final liveness");
    }
}
