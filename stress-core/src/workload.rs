//! Workload controller.
//!
//! The workload runs as a detached background task. Whether it is alive is
//! decided only by listing guest processes; the task's own outcome is logged
//! and otherwise ignored.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::WorkloadConfig;
use crate::error::{ConfigError, GuestError, StressError};
use crate::guest::{GuestChannel, Session};
use crate::wait::wait_for;

/// Body of the workload, executed on a background task.
#[async_trait]
pub trait WorkloadRunner: Send + Sync {
    /// Run the workload sub-test to completion.
    async fn run(&self, sub_test: &str) -> Result<(), GuestError>;
}

/// Orchestrator-side handle on a launched workload task.
///
/// Carries no result channel. Dropping it detaches the task.
#[derive(Debug)]
pub struct WorkloadHandle {
    id: Uuid,
    sub_test: String,
    launched_at: Instant,
    _task: JoinHandle<()>,
}

impl WorkloadHandle {
    /// Identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sub-test this task runs.
    pub fn sub_test(&self) -> &str {
        &self.sub_test
    }

    /// When the task was launched.
    pub fn launched_at(&self) -> Instant {
        self.launched_at
    }
}

/// Starts, observes and stops the in-guest workload.
pub struct WorkloadController {
    config: WorkloadConfig,
    pattern: Regex,
    channel: Arc<dyn GuestChannel>,
    runner: Arc<dyn WorkloadRunner>,
}

impl WorkloadController {
    /// Create a controller, validating the workload config.
    pub fn new(
        config: WorkloadConfig,
        channel: Arc<dyn GuestChannel>,
        runner: Arc<dyn WorkloadRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pattern = config.process_pattern()?;
        Ok(Self {
            config,
            pattern,
            channel,
            runner,
        })
    }

    /// Launch the workload in the background and wait until it shows up in
    /// the guest's process listing.
    pub async fn start(&self) -> Result<WorkloadHandle, StressError> {
        tracing::info!("Run video background ({})", self.config.video_test);
        let handle = self.launch();

        let timeout = self.config.start_timeout();
        let found = wait_for(timeout, self.config.poll_interval(), move || self.is_running())
            .await
            .map_err(StressError::Workload)?;

        match found {
            Some(process) => {
                tracing::info!(
                    "Workload {} running as {} (launched {:?} ago)",
                    handle.id(),
                    process,
                    handle.launched_at().elapsed()
                );
                Ok(handle)
            }
            None => Err(StressError::WorkloadNotStarted {
                sub_test: self.config.video_test.clone(),
                waited: timeout,
            }),
        }
    }

    /// List guest processes and return the matched workload token, if any.
    ///
    /// All matches are concatenated, as the cleanup command expects.
    pub async fn is_running(&self) -> Result<Option<String>, GuestError> {
        tracing::debug!("Check if video is playing");
        let listing = self.channel.execute(&self.config.check_running_cmd).await?;
        let process: String = self
            .pattern
            .find_iter(&listing.output)
            .map(|m| m.as_str())
            .collect();
        tracing::debug!("Video process: {:?}", process);
        Ok((!process.is_empty()).then_some(process))
    }

    /// Force-remove the workload if it is running. A no-op otherwise.
    pub async fn stop(&self, session: &dyn Session) -> Result<(), StressError> {
        let Some(process) = self.is_running().await.map_err(StressError::Workload)? else {
            tracing::debug!("No workload process found, nothing to stop");
            return Ok(());
        };

        tracing::info!("Stop background video ({})", process);
        session
            .cmd(&self.config.clean_command(&process))
            .await
            .map_err(StressError::Workload)?;
        Ok(())
    }

    fn launch(&self) -> WorkloadHandle {
        let id = Uuid::new_v4();
        let sub_test = self.config.video_test.clone();
        let runner = Arc::clone(&self.runner);
        let task_sub_test = sub_test.clone();

        let task = tokio::spawn(async move {
            match runner.run(&task_sub_test).await {
                Ok(()) => tracing::debug!("Workload {} ({}) exited", id, task_sub_test),
                Err(e) => tracing::warn!("Workload {} ({}) failed: {}", id, task_sub_test, e),
            }
        });

        WorkloadHandle {
            id,
            sub_test,
            launched_at: Instant::now(),
            _task: task,
        }
    }
}
