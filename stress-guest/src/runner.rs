//! Workload runner that plays the sub-test inside the guest over SSH.

use async_trait::async_trait;
use stress_core::{GuestError, WorkloadRunner};

use crate::config::RunnerConfig;
use crate::ssh::SshTarget;

/// Runs `[runner].command` in the guest and waits for it to exit.
#[derive(Debug, Clone)]
pub struct SshWorkloadRunner {
    target: SshTarget,
    config: RunnerConfig,
}

impl SshWorkloadRunner {
    /// Runner on `target`.
    pub fn new(target: SshTarget, config: RunnerConfig) -> Self {
        Self { target, config }
    }
}

#[async_trait]
impl WorkloadRunner for SshWorkloadRunner {
    async fn run(&self, sub_test: &str) -> Result<(), GuestError> {
        let command = self.config.command_for(sub_test);
        tracing::info!("Running workload `{}` on {}", command, self.target.host());
        let result = self.target.exec_ok(&command).await?;
        tracing::debug!("Workload `{}` finished: {}", command, result.stdout.trim());
        Ok(())
    }
}
