//! Memory boundary and the balloon controller interface.

use async_trait::async_trait;
use rand::Rng;

use crate::error::BalloonError;

/// Legal balloon target range in MB, resolved once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBoundary {
    min: u64,
    max: u64,
}

impl MemoryBoundary {
    /// Create a boundary, rejecting `min > max`.
    pub fn new(min: u64, max: u64) -> Result<Self, BalloonError> {
        if min > max {
            return Err(BalloonError::InvalidBoundary { min, max });
        }
        Ok(Self { min, max })
    }

    /// Lower bound in MB.
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Upper bound in MB.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Draw a target uniformly from `[min, max)`, truncated to whole MB.
    ///
    /// A degenerate boundary (`min == max`) always yields `min`.
    pub fn random_target<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.min == self.max {
            return self.min;
        }
        let target = rng.gen_range(self.min as f64..self.max as f64) as u64;
        target.clamp(self.min, self.max - 1)
    }
}

impl std::fmt::Display for MemoryBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} MB, {} MB]", self.min, self.max)
    }
}

/// Drives the guest's balloon device.
#[async_trait]
pub trait BalloonController: Send + Sync {
    /// Legal target range for the current guest configuration.
    async fn get_memory_boundary(&self) -> Result<MemoryBoundary, BalloonError>;

    /// Set the balloon to `target` MB, returning once the guest has settled.
    async fn balloon_memory(&self, target: u64) -> Result<(), BalloonError>;
}
