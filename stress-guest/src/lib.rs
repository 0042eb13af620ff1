//! # balloon-stress-guest
//!
//! Concrete collaborators for driving a real QEMU guest:
//!
//! - [`ssh`]: guest command channel and session over `ssh`
//! - [`qmp`]: QMP monitor client on the VM's unix socket
//! - [`QmpBalloon`]: balloon controller using `balloon` / `query-balloon`
//! - [`QemuVm`]: liveness via `query-status`, SSH login, driver verifier
//! - [`SshWorkloadRunner`]: runs the workload sub-test in the guest

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod balloon;
pub mod config;
pub mod qmp;
pub mod runner;
pub mod ssh;
pub mod vm;

pub use balloon::QmpBalloon;
pub use config::{GuestConfig, MonitorConfig, RunnerConfig};
pub use qmp::{QmpClient, QmpError};
pub use runner::SshWorkloadRunner;
pub use ssh::{SshChannel, SshError, SshResult, SshSession, SshTarget};
pub use vm::QemuVm;
