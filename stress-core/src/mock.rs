//! Mock collaborators for testing.
//!
//! [`MockGuest`] keeps an in-memory process table and serves as guest command
//! channel, workload runner and session factory. [`MockVm`] and
//! [`MockBalloon`] cover the VM handle and the balloon device. All mocks
//! record what they were asked to do and can be told to fail.
//!
//! Every call sleeps for a small simulated round-trip (1ms by default) so
//! wall-clock thresholds behave like they do against a real guest.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::balloon::{BalloonController, MemoryBoundary};
use crate::error::{BalloonError, GuestError};
use crate::guest::{CommandOutput, GuestChannel, Session, Vm};
use crate::workload::WorkloadRunner;

const DEFAULT_LATENCY: Duration = Duration::from_millis(1);

/// In-memory guest: process table, command log and event log.
#[derive(Debug, Clone)]
pub struct MockGuest {
    inner: Arc<Mutex<MockGuestInner>>,
}

#[derive(Debug)]
struct MockGuestInner {
    workload_process: String,
    processes: Vec<(u32, String)>,
    next_pid: u32,
    executed: Vec<String>,
    session_commands: Vec<String>,
    launches: Vec<String>,
    materialize_limit: Option<usize>,
    fail_next_execute: Option<String>,
    fail_next_session_cmd: Option<String>,
    down_for: u32,
    outage_triggers: Vec<(String, u32)>,
    spawn_triggers: Vec<(String, String)>,
    sessions_opened: u32,
    sessions_closed: u32,
    events: Vec<String>,
    latency: Duration,
}

impl MockGuest {
    /// Create a guest whose workload shows up as `workload_process`.
    pub fn new(workload_process: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockGuestInner {
                workload_process: workload_process.to_string(),
                processes: Vec::new(),
                next_pid: 1000,
                executed: Vec::new(),
                session_commands: Vec::new(),
                launches: Vec::new(),
                materialize_limit: None,
                fail_next_execute: None,
                fail_next_session_cmd: None,
                down_for: 0,
                outage_triggers: Vec::new(),
                spawn_triggers: Vec::new(),
                sessions_opened: 0,
                sessions_closed: 0,
                events: Vec::new(),
                latency: DEFAULT_LATENCY,
            })),
        }
    }

    /// Add a process to the guest's process table.
    pub fn spawn_process(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.spawn(name);
    }

    /// Only the first `count` workload launches produce a process.
    pub fn materialize_launches(&self, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.materialize_limit = Some(count);
    }

    /// Cause the next `execute()` to fail with a transport error.
    pub fn fail_next_execute(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_execute = Some(error.to_string());
    }

    /// Cause the next session `cmd()` to fail with a non-zero status.
    pub fn fail_next_session_cmd(&self, output: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_session_cmd = Some(output.to_string());
    }

    /// After `command` runs, the next `calls` executions fail as unreachable.
    pub fn outage_after(&self, command: &str, calls: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.outage_triggers.push((command.to_string(), calls));
    }

    /// Running `command` adds `process` to the process table.
    pub fn spawn_on(&self, command: &str, process: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .spawn_triggers
            .push((command.to_string(), process.to_string()));
    }

    /// Set the simulated round-trip time.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.latency = latency;
    }

    /// Open a session on this guest.
    pub fn session(&self) -> MockSession {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions_opened += 1;
        MockSession {
            guest: self.clone(),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Names of the processes currently running.
    pub fn processes(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.processes.iter().map(|(_, name)| name.clone()).collect()
    }

    /// Commands sent through `execute()`.
    pub fn executed(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.executed.clone()
    }

    /// Commands sent through session `cmd()`.
    pub fn session_commands(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.session_commands.clone()
    }

    /// Sub-tests launched through the workload runner.
    pub fn launches(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.launches.clone()
    }

    /// Number of sessions opened.
    pub fn sessions_opened(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.sessions_opened
    }

    /// Number of session `close()` calls.
    pub fn sessions_closed(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.sessions_closed
    }

    /// Ordered log of launches, cleanups and balloon adjustments.
    pub fn events(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.events.clone()
    }

    fn record_event(&self, event: String) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(event);
    }

    fn latency(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        inner.latency
    }
}

impl MockGuestInner {
    fn spawn(&mut self, name: &str) {
        let pid = self.next_pid;
        self.next_pid += 4;
        self.processes.push((pid, name.to_string()));
    }

    fn tasklist(&self) -> String {
        let mut out = String::from(
            "Image Name                     PID Session Name\n\
             ========================= ======== ============\n\
             System Idle Process              0 Services\n",
        );
        for (pid, name) in &self.processes {
            out.push_str(&format!("{:<25} {:>8} Console\n", name, pid));
        }
        out
    }
}

#[async_trait]
impl GuestChannel for MockGuest {
    async fn execute(&self, command: &str) -> Result<CommandOutput, GuestError> {
        tokio::time::sleep(self.latency()).await;
        let mut inner = self.inner.lock().unwrap();
        inner.executed.push(command.to_string());

        if let Some(error) = inner.fail_next_execute.take() {
            return Err(GuestError::Transport(error));
        }
        if inner.down_for > 0 {
            inner.down_for -= 1;
            return Err(GuestError::Transport("guest unreachable".into()));
        }

        let spawned: Vec<String> = inner
            .spawn_triggers
            .iter()
            .filter(|(trigger, _)| trigger == command)
            .map(|(_, process)| process.clone())
            .collect();
        for process in spawned {
            inner.spawn(&process);
        }
        let outage = inner
            .outage_triggers
            .iter()
            .find(|(trigger, _)| trigger == command)
            .map(|(_, calls)| *calls);
        if let Some(calls) = outage {
            inner.down_for = calls;
        }

        Ok(CommandOutput {
            status: 0,
            output: inner.tasklist(),
        })
    }
}

#[async_trait]
impl WorkloadRunner for MockGuest {
    async fn run(&self, sub_test: &str) -> Result<(), GuestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.launches.push(sub_test.to_string());
        inner.events.push(format!("launch {}", sub_test));

        let materialize = inner
            .materialize_limit
            .map_or(true, |limit| inner.launches.len() <= limit);
        if materialize {
            let name = inner.workload_process.clone();
            inner.spawn(&name);
        }
        Ok(())
    }
}

/// Session on a [`MockGuest`]. Commands naming a process remove it.
#[derive(Debug, Clone)]
pub struct MockSession {
    guest: MockGuest,
    closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl Session for MockSession {
    async fn cmd(&self, command: &str) -> Result<String, GuestError> {
        tokio::time::sleep(self.guest.latency()).await;
        if *self.closed.lock().unwrap() {
            return Err(GuestError::SessionClosed);
        }

        let mut inner = self.guest.inner.lock().unwrap();
        inner.session_commands.push(command.to_string());
        inner.events.push(format!("cmd {}", command));

        if let Some(output) = inner.fail_next_session_cmd.take() {
            return Err(GuestError::CommandFailed {
                command: command.to_string(),
                status: 1,
                output,
            });
        }

        inner.processes.retain(|(_, name)| !command.contains(name.as_str()));
        Ok(String::new())
    }

    async fn close(&self) -> Result<(), GuestError> {
        *self.closed.lock().unwrap() = true;
        let mut inner = self.guest.inner.lock().unwrap();
        inner.sessions_closed += 1;
        Ok(())
    }
}

/// Mock VM handle backed by a [`MockGuest`].
#[derive(Debug, Clone)]
pub struct MockVm {
    guest: MockGuest,
    inner: Arc<Mutex<MockVmInner>>,
}

#[derive(Debug, Default)]
struct MockVmInner {
    verify_calls: u32,
    fail_verify_on_call: Option<u32>,
    login_timeouts: Vec<Duration>,
    fail_next_login: Option<String>,
    verifier_drivers: Vec<String>,
    fail_next_verifier: bool,
}

impl MockVm {
    /// Create a VM whose sessions run on `guest`.
    pub fn new(guest: &MockGuest) -> Self {
        Self {
            guest: guest.clone(),
            inner: Arc::new(Mutex::new(MockVmInner::default())),
        }
    }

    /// Make the `n`-th `verify_alive()` call (1-based) fail.
    pub fn fail_verify_on_call(&self, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_verify_on_call = Some(n);
    }

    /// Cause the next login to fail with a timeout.
    pub fn fail_next_login(&self, what: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_login = Some(what.to_string());
    }

    /// Cause the next driver verifier setup to fail.
    pub fn fail_next_verifier(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_verifier = true;
    }

    /// Number of `verify_alive()` calls.
    pub fn verify_calls(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.verify_calls
    }

    /// Timeouts passed to `wait_for_login()`.
    pub fn login_timeouts(&self) -> Vec<Duration> {
        let inner = self.inner.lock().unwrap();
        inner.login_timeouts.clone()
    }

    /// Drivers passed to `setup_driver_verifier()`.
    pub fn verifier_drivers(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.verifier_drivers.clone()
    }
}

#[async_trait]
impl Vm for MockVm {
    async fn verify_alive(&self) -> Result<(), GuestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.verify_calls += 1;
        if inner.fail_verify_on_call == Some(inner.verify_calls) {
            return Err(GuestError::NotAlive("guest panicked".into()));
        }
        Ok(())
    }

    async fn wait_for_login(&self, timeout: Duration) -> Result<Box<dyn Session>, GuestError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.login_timeouts.push(timeout);
            if let Some(what) = inner.fail_next_login.take() {
                return Err(GuestError::Timeout {
                    what,
                    waited: timeout,
                });
            }
        }
        Ok(Box::new(self.guest.session()))
    }

    async fn setup_driver_verifier(
        &self,
        driver_name: &str,
        _timeout: Duration,
    ) -> Result<(), GuestError> {
        let mut inner = self.inner.lock().unwrap();
        inner.verifier_drivers.push(driver_name.to_string());
        if std::mem::take(&mut inner.fail_next_verifier) {
            return Err(GuestError::VerifierNotEnabled {
                driver: driver_name.to_string(),
            });
        }
        Ok(())
    }
}

/// Mock balloon device with a fixed boundary.
#[derive(Debug, Clone)]
pub struct MockBalloon {
    inner: Arc<Mutex<MockBalloonInner>>,
    guest: Option<MockGuest>,
}

#[derive(Debug)]
struct MockBalloonInner {
    min: u64,
    max: u64,
    boundary_calls: u32,
    targets: Vec<u64>,
    fail_on_adjustment: Option<usize>,
    fail_boundary: Option<String>,
    latency: Duration,
}

impl MockBalloon {
    /// Create a balloon with boundary `[min, max]` MB.
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBalloonInner {
                min,
                max,
                boundary_calls: 0,
                targets: Vec::new(),
                fail_on_adjustment: None,
                fail_boundary: None,
                latency: DEFAULT_LATENCY,
            })),
            guest: None,
        }
    }

    /// Also log adjustments into `guest`'s event log.
    pub fn attached(guest: &MockGuest, min: u64, max: u64) -> Self {
        Self {
            guest: Some(guest.clone()),
            ..Self::new(min, max)
        }
    }

    /// Make the `n`-th adjustment (1-based) fail.
    pub fn fail_on_adjustment(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_on_adjustment = Some(n);
    }

    /// Cause boundary resolution to fail.
    pub fn fail_boundary(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_boundary = Some(error.to_string());
    }

    /// Set the simulated time an adjustment or boundary query takes.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.latency = latency;
    }

    /// Targets of every adjustment attempted, in order.
    pub fn targets(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();
        inner.targets.clone()
    }

    /// Number of boundary resolutions.
    pub fn boundary_calls(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.boundary_calls
    }

    fn latency(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        inner.latency
    }
}

#[async_trait]
impl BalloonController for MockBalloon {
    async fn get_memory_boundary(&self) -> Result<MemoryBoundary, BalloonError> {
        tokio::time::sleep(self.latency()).await;
        let mut inner = self.inner.lock().unwrap();
        inner.boundary_calls += 1;
        if let Some(error) = inner.fail_boundary.take() {
            return Err(BalloonError::Monitor(error));
        }
        MemoryBoundary::new(inner.min, inner.max)
    }

    async fn balloon_memory(&self, target: u64) -> Result<(), BalloonError> {
        tokio::time::sleep(self.latency()).await;
        if let Some(guest) = &self.guest {
            guest.record_event(format!("balloon {}", target));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.targets.push(target);
        if inner.fail_on_adjustment == Some(inner.targets.len()) {
            return Err(BalloonError::Monitor(format!(
                "balloon to {} MB rejected",
                target
            )));
        }
        Ok(())
    }
}
