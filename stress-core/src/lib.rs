//! # balloon-stress-core
//!
//! Stress orchestration for a virtual machine's memory-balloon device.
//!
//! The orchestrator repeatedly resizes the guest through a balloon controller
//! while keeping a workload process alive inside the guest, restarting it
//! whenever its time budget runs out, and finally checks that the guest is
//! still responsive.
//!
//! ## Collaborators
//!
//! Everything that touches a real guest is behind a trait in [`guest`] and
//! [`balloon`]:
//!
//! - [`GuestChannel`]: run a command in the guest, get status + output
//! - [`Session`]: interactive channel used for cleanup commands
//! - [`Vm`]: liveness, login, driver verifier setup
//! - [`WorkloadRunner`]: the workload body launched as a background task
//! - [`BalloonController`]: memory boundary and absolute balloon target
//!
//! [`mock`] provides in-memory implementations for tests.
//!
//! ## Example
//!
//! ```ignore
//! let mut orchestrator = StressOrchestrator::new(stress, workload, context)?;
//! let summary = orchestrator.run().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod balloon;
pub mod config;
pub mod error;
pub mod guest;
pub mod mock;
pub mod orchestrator;
pub mod wait;
pub mod workload;

pub use balloon::{BalloonController, MemoryBoundary};
pub use config::{StressConfig, WorkloadConfig};
pub use error::{BalloonError, ConfigError, GuestError, Phase, StressError};
pub use guest::{CommandOutput, GuestChannel, Session, Vm};
pub use orchestrator::{RunSummary, StressContext, StressOrchestrator, RESTART_ITERATION_LIMIT};
pub use wait::wait_for;
pub use workload::{WorkloadController, WorkloadHandle, WorkloadRunner};
