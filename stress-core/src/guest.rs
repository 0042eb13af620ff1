//! Guest-side collaborator traits.
//!
//! These are the interfaces the orchestrator consumes; concrete SSH/QMP
//! implementations live in the guest crate, in-memory ones in [`crate::mock`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::GuestError;

/// Result of a command executed in the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status (0 = success).
    pub status: i32,
    /// Captured standard output.
    pub output: String,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit status 0).
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Executes command strings inside the guest.
#[async_trait]
pub trait GuestChannel: Send + Sync {
    /// Run `command` and return its status and output.
    ///
    /// A non-zero status is not an error here; only transport failures are.
    async fn execute(&self, command: &str) -> Result<CommandOutput, GuestError>;
}

/// An open interactive channel to the guest.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run `command`, failing on a non-zero status. Returns the output.
    async fn cmd(&self, command: &str) -> Result<String, GuestError>;

    /// Close the session.
    async fn close(&self) -> Result<(), GuestError>;
}

/// Handle on the virtual machine under test.
#[async_trait]
pub trait Vm: Send + Sync {
    /// Fail unless the VM is running and responsive.
    async fn verify_alive(&self) -> Result<(), GuestError>;

    /// Wait up to `timeout` for a guest login and return the session.
    async fn wait_for_login(&self, timeout: Duration) -> Result<Box<dyn Session>, GuestError>;

    /// Put `driver_name` under driver verifier, rebooting the guest if needed.
    async fn setup_driver_verifier(
        &self,
        driver_name: &str,
        timeout: Duration,
    ) -> Result<(), GuestError>;
}
