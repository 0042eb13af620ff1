//! Balloon controller backed by the QEMU monitor.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use stress_core::{wait_for, BalloonController, BalloonError, MemoryBoundary};

use crate::config::MonitorConfig;
use crate::qmp::{QmpClient, QmpError};

const MB: u64 = 1024 * 1024;

/// Smallest balloon request, used to find how far the guest can shrink.
const PROBE_TARGET_MB: u64 = 1;

/// Drives the virtio balloon through QMP `balloon` / `query-balloon`.
#[derive(Debug, Clone)]
pub struct QmpBalloon {
    client: QmpClient,
    config: MonitorConfig,
}

impl QmpBalloon {
    /// Controller for the monitor described by `config`.
    pub fn new(config: MonitorConfig) -> Self {
        let client = QmpClient::new(&config.qmp_socket, config.command_timeout());
        Self { client, config }
    }

    /// Current balloon size in MB.
    pub async fn current_mb(&self) -> Result<u64, BalloonError> {
        Ok(self.client.query_balloon().await? / MB)
    }

    /// Request `target` MB and return the size the guest settled at.
    async fn set_and_settle(&self, target: u64) -> Result<u64, BalloonError> {
        self.client.balloon(target * MB).await?;
        self.settle(target).await
    }

    /// Deflate fully to find the guest's floor, then restore to `max`.
    async fn probe_floor(&self, max: u64) -> Result<u64, BalloonError> {
        let floor = self.set_and_settle(PROBE_TARGET_MB).await?;
        let used = (floor + self.config.balloon_buffer_mb).min(max);
        tracing::info!("Guest shrank to {} MB, using {} MB as floor", floor, used);
        self.set_and_settle(max).await?;
        Ok(used)
    }

    /// Poll the balloon until two consecutive readings agree.
    async fn settle(&self, target: u64) -> Result<u64, BalloonError> {
        let timeout = self.config.balloon_timeout();
        let last = &AtomicU64::new(u64::MAX);
        let client = &self.client;

        let settled = wait_for(timeout, self.config.settle_interval(), move || async move {
            let actual = client.query_balloon().await?;
            let previous = last.swap(actual, Ordering::SeqCst);
            tracing::debug!("Balloon reading: {} MB (target {} MB)", actual / MB, target);
            Ok::<_, QmpError>((previous == actual).then_some(actual / MB))
        })
        .await?;

        settled.ok_or(BalloonError::NotSettled {
            target,
            waited: timeout,
        })
    }
}

#[async_trait]
impl BalloonController for QmpBalloon {
    async fn get_memory_boundary(&self) -> Result<MemoryBoundary, BalloonError> {
        let max = match self.config.mem_mb {
            Some(mem) => mem,
            None => self.current_mb().await?,
        };

        let min = if self.config.probe_floor {
            let used = match self.probe_floor(max).await {
                Ok(used) => used,
                Err(e) => {
                    if let Err(restore) = self.client.balloon(max * MB).await {
                        tracing::warn!("Failed to restore balloon to {} MB: {}", max, restore);
                    }
                    return Err(e);
                }
            };
            used.max(self.config.min_mem_mb)
        } else {
            self.config.min_mem_mb
        };

        let boundary = MemoryBoundary::new(min, max)?;
        tracing::info!("Memory boundary: {}", boundary);
        Ok(boundary)
    }

    async fn balloon_memory(&self, target: u64) -> Result<(), BalloonError> {
        let actual = self.set_and_settle(target).await?;
        let allowed = self.config.tolerance_ratio * target as f64;
        if actual.abs_diff(target) as f64 > allowed {
            return Err(BalloonError::Mismatch { target, actual });
        }
        tracing::debug!("Balloon settled at {} MB", actual);
        Ok(())
    }
}
