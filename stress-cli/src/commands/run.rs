//! Run the stress test against a live guest.

use anyhow::{Context, Result};
use std::sync::Arc;
use stress_core::{StressContext, StressOrchestrator};
use stress_guest::{QemuVm, QmpBalloon, QmpClient, SshChannel, SshTarget, SshWorkloadRunner};

use crate::config::Config;

/// Wire the SSH and QMP collaborators together and run the stress loop.
pub async fn run(config: Config) -> Result<()> {
    let context = build_context(&config);
    let mut orchestrator = StressOrchestrator::new(config.stress, config.workload, context)
        .context("Failed to set up stress run")?;

    let summary = orchestrator
        .run()
        .await
        .with_context(|| format!("Stress run {} failed", orchestrator.run_id()))?;

    println!(
        "Stress run {} passed: {} balloon adjustments, {} workload restarts",
        summary.run_id, summary.iterations, summary.restarts
    );
    Ok(())
}

fn build_context(config: &Config) -> StressContext {
    let target = SshTarget::from_config(&config.guest);
    let channel = Arc::new(SshChannel::new(target.clone()));
    let qmp = QmpClient::new(&config.monitor.qmp_socket, config.monitor.command_timeout());

    StressContext {
        vm: Arc::new(QemuVm::new(&config.guest, qmp, channel.clone())),
        channel,
        balloon: Arc::new(QmpBalloon::new(config.monitor.clone())),
        runner: Arc::new(SshWorkloadRunner::new(target, config.runner.clone())),
    }
}
