//! Handle on a QEMU guest: monitor liveness, SSH login, driver verifier.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stress_core::{wait_for, GuestChannel, GuestError, Session, Vm};

use crate::config::GuestConfig;
use crate::qmp::QmpClient;
use crate::ssh::{SshSession, SshTarget};

const VERIFIER_QUERY: &str = "verifier /querysettings";
const REBOOT: &str = "shutdown /r /t 0";
const PING: &str = "echo ok";

/// QEMU VM reached through its QMP monitor and SSH.
pub struct QemuVm {
    qmp: QmpClient,
    target: SshTarget,
    channel: Arc<dyn GuestChannel>,
    login_poll_interval: Duration,
    reboot_timeout: Duration,
}

impl QemuVm {
    /// VM handle; `channel` runs the verifier commands.
    pub fn new(config: &GuestConfig, qmp: QmpClient, channel: Arc<dyn GuestChannel>) -> Self {
        Self {
            qmp,
            target: SshTarget::from_config(config),
            channel,
            login_poll_interval: config.login_poll_interval(),
            reboot_timeout: config.reboot_timeout(),
        }
    }

    async fn driver_verified(&self, driver_name: &str) -> Result<bool, GuestError> {
        let settings = self.channel.execute(VERIFIER_QUERY).await?;
        Ok(driver_listed(&settings.output, driver_name))
    }

    /// True if the guest answers a trivial command. Any channel error counts as down.
    async fn reachable(&self) -> bool {
        match self.channel.execute(PING).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!("Guest {} unreachable: {}", self.target.host(), e);
                false
            }
        }
    }

    /// Wait until the guest stops (`up == false`) or starts (`up == true`) answering.
    async fn wait_reachable(&self, up: bool, timeout: Duration) -> Result<(), GuestError> {
        let vm = self;
        let reached = wait_for(timeout, self.login_poll_interval, move || async move {
            Ok::<_, GuestError>((vm.reachable().await == up).then_some(()))
        })
        .await?;

        let what = if up { "guest login" } else { "guest shutdown" };
        reached.ok_or_else(|| GuestError::Timeout {
            what: what.to_string(),
            waited: timeout,
        })
    }

    async fn reboot(&self, timeout: Duration) -> Result<(), GuestError> {
        tracing::info!("Rebooting guest {}", self.target.host());
        // The connection may drop before ssh reports the exit status.
        if let Err(e) = self.channel.execute(REBOOT).await {
            tracing::debug!("Reboot command returned: {}", e);
        }
        self.wait_reachable(false, self.reboot_timeout).await?;
        self.wait_reachable(true, timeout).await
    }
}

/// True if verifier's settings output names `{driver_name}.sys`.
fn driver_listed(settings: &str, driver_name: &str) -> bool {
    let needle = format!("{}.sys", driver_name.to_lowercase());
    settings.to_lowercase().contains(&needle)
}

#[async_trait]
impl Vm for QemuVm {
    async fn verify_alive(&self) -> Result<(), GuestError> {
        let status = self.qmp.query_status().await?;
        if status != "running" {
            return Err(GuestError::NotAlive(format!("vm status is {}", status)));
        }
        Ok(())
    }

    async fn wait_for_login(&self, timeout: Duration) -> Result<Box<dyn Session>, GuestError> {
        tracing::info!("Waiting up to {:?} for login on {}", timeout, self.target.host());
        self.wait_reachable(true, timeout).await?;
        Ok(Box::new(SshSession::new(self.target.clone())))
    }

    async fn setup_driver_verifier(
        &self,
        driver_name: &str,
        timeout: Duration,
    ) -> Result<(), GuestError> {
        if self.driver_verified(driver_name).await? {
            tracing::info!("Driver verifier already enabled for {}", driver_name);
            return Ok(());
        }

        let enable = format!("verifier /standard /driver {}.sys", driver_name);
        // verifier exits non-zero when a reboot is pending
        let result = self.channel.execute(&enable).await?;
        tracing::debug!("`{}` exited with {}", enable, result.status);

        self.reboot(timeout).await?;

        if !self.driver_verified(driver_name).await? {
            return Err(GuestError::VerifierNotEnabled {
                driver: driver_name.to_string(),
            });
        }
        tracing::info!("Driver verifier enabled for {}", driver_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qmp::fake::FakeMonitor;
    use serde_json::json;
    use stress_core::mock::MockGuest;

    fn vm(monitor: &FakeMonitor, guest: &MockGuest) -> QemuVm {
        QemuVm::new(
            &GuestConfig::new("192.0.2.10"),
            monitor.client(),
            Arc::new(guest.clone()),
        )
    }

    fn status_monitor(status: &'static str) -> FakeMonitor {
        FakeMonitor::start(move |_, _| {
            json!({ "return": { "status": status, "running": status == "running" } })
        })
    }

    #[test]
    fn driver_listing_is_case_insensitive() {
        let settings = "Verified Drivers:\n\nName: BALLOON.SYS, loaded: Yes\n";
        assert!(driver_listed(settings, "balloon"));
        assert!(!driver_listed(settings, "viostor"));
        assert!(!driver_listed("Verified Drivers:\n\nNone\n", "balloon"));
    }

    #[tokio::test]
    async fn running_vm_is_alive() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        vm(&monitor, &guest).verify_alive().await.unwrap();
    }

    #[tokio::test]
    async fn paused_vm_is_not_alive() {
        let monitor = status_monitor("paused");
        let guest = MockGuest::new("test.exe");
        let err = vm(&monitor, &guest).verify_alive().await.unwrap_err();
        assert!(matches!(err, GuestError::NotAlive(ref msg) if msg.contains("paused")));
    }

    #[tokio::test]
    async fn already_verified_driver_needs_no_reboot() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        guest.spawn_process("balloon.sys");

        vm(&monitor, &guest)
            .setup_driver_verifier("balloon", Duration::from_secs(360))
            .await
            .unwrap();
        assert_eq!(guest.executed(), vec![VERIFIER_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn verifier_query_failure_propagates() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        guest.fail_next_execute("connection reset");

        let err = vm(&monitor, &guest)
            .setup_driver_verifier("balloon", Duration::from_secs(360))
            .await
            .unwrap_err();
        assert!(matches!(err, GuestError::Transport(_)));
    }

    const ENABLE: &str = "verifier /standard /driver balloon.sys";

    #[tokio::test(start_paused = true)]
    async fn verifier_enabled_across_reboot() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        guest.spawn_on(ENABLE, "balloon.sys");
        guest.outage_after(REBOOT, 2);

        vm(&monitor, &guest)
            .setup_driver_verifier("balloon", Duration::from_secs(360))
            .await
            .unwrap();

        assert_eq!(
            guest.executed(),
            vec![VERIFIER_QUERY, ENABLE, REBOOT, PING, PING, PING, VERIFIER_QUERY]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn verifier_still_missing_after_reboot() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        guest.outage_after(REBOOT, 1);

        let err = vm(&monitor, &guest)
            .setup_driver_verifier("balloon", Duration::from_secs(360))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GuestError::VerifierNotEnabled { ref driver } if driver == "balloon"
        ));
        assert_eq!(guest.executed().last().unwrap(), VERIFIER_QUERY);
    }

    #[tokio::test(start_paused = true)]
    async fn guest_that_never_goes_down_times_out() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");

        let err = vm(&monitor, &guest)
            .setup_driver_verifier("balloon", Duration::from_secs(360))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GuestError::Timeout { ref what, .. } if what == "guest shutdown"
        ));
    }

    #[tokio::test]
    #[ignore = "requires guest"]
    async fn login_to_live_guest() {
        let monitor = status_monitor("running");
        let guest = MockGuest::new("test.exe");
        let session = vm(&monitor, &guest)
            .wait_for_login(Duration::from_secs(60))
            .await
            .unwrap();
        session.cmd("echo ok").await.unwrap();
        session.close().await.unwrap();
    }
}
