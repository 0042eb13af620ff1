//! Stress orchestrator.
//!
//! Owns the stress loop: one randomized balloon adjustment per iteration,
//! preceded by a workload restart whenever the workload has outlived its
//! time budget. Every failure is fatal and propagates immediately.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::balloon::{BalloonController, MemoryBoundary};
use crate::config::{StressConfig, WorkloadConfig};
use crate::error::{Result, StressError};
use crate::guest::{GuestChannel, Session, Vm};
use crate::workload::{WorkloadController, WorkloadRunner};

/// Restarts never happen at or past this iteration, whatever `repeat_times` is.
pub const RESTART_ITERATION_LIMIT: u32 = 500;

/// Collaborators a stress run talks to.
#[derive(Clone)]
pub struct StressContext {
    /// VM handle.
    pub vm: Arc<dyn Vm>,
    /// Command channel used for process listings.
    pub channel: Arc<dyn GuestChannel>,
    /// Balloon device.
    pub balloon: Arc<dyn BalloonController>,
    /// Workload body launched in the background.
    pub runner: Arc<dyn WorkloadRunner>,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifier of the run, as logged.
    pub run_id: Uuid,
    /// Balloon adjustments applied.
    pub iterations: u32,
    /// Workload restarts performed inside the loop.
    pub restarts: u32,
}

/// Decide whether the workload is restarted before iteration `iteration`.
pub fn should_restart(elapsed: Duration, budget: Duration, iteration: u32) -> bool {
    elapsed > budget && iteration < RESTART_ITERATION_LIMIT
}

/// Runs the balloon stress sequence against one guest.
pub struct StressOrchestrator {
    config: StressConfig,
    context: StressContext,
    workload: WorkloadController,
    rng: StdRng,
    run_id: Uuid,
}

impl StressOrchestrator {
    /// Validate both config sections and wire the collaborators.
    pub fn new(
        config: StressConfig,
        workload: WorkloadConfig,
        context: StressContext,
    ) -> Result<Self> {
        config.validate()?;
        let workload = WorkloadController::new(
            workload,
            Arc::clone(&context.channel),
            Arc::clone(&context.runner),
        )?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            context,
            workload,
            rng,
            run_id: Uuid::new_v4(),
        })
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run the whole sequence: boot check, login, driver verifier, workload
    /// start, stress loop, final liveness check.
    ///
    /// The login session is closed exactly once, whatever the outcome.
    pub async fn run(&mut self) -> Result<RunSummary> {
        tracing::info!("Stress run {} starting", self.run_id);

        tracing::info!("Boot guest with balloon device");
        self.context.vm.verify_alive().await.map_err(StressError::Boot)?;

        let session = self
            .context
            .vm
            .wait_for_login(self.config.login_wait())
            .await
            .map_err(StressError::Login)?;

        let result = self.run_with_session(session.as_ref()).await;

        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close guest session: {}", e);
        }

        match &result {
            Ok(summary) => tracing::info!(
                "Stress run {} passed: {} iterations, {} restarts",
                self.run_id,
                summary.iterations,
                summary.restarts
            ),
            Err(e) => tracing::error!(
                "Stress run {} failed in {} phase: {}",
                self.run_id,
                e.phase(),
                e
            ),
        }
        result
    }

    async fn run_with_session(&mut self, session: &dyn Session) -> Result<RunSummary> {
        let driver = self.config.driver_name.clone();
        tracing::info!("Enable driver verifier for {}", driver);
        self.context
            .vm
            .setup_driver_verifier(&driver, self.config.login_wait())
            .await
            .map_err(|source| StressError::DriverVerifier {
                driver: driver.clone(),
                source,
            })?;

        let mut workload = self.workload.start().await?;

        tracing::info!("Balloon vm memory in loop");
        let boundary = self
            .context
            .balloon
            .get_memory_boundary()
            .await
            .map_err(StressError::Boundary)?;
        tracing::info!("Memory boundary: {}", boundary);

        let budget = self.config.video_budget();
        let mut summary = RunSummary {
            run_id: self.run_id,
            iterations: 0,
            restarts: 0,
        };
        let mut start_time = Instant::now();

        for i in 0..self.config.repeat_times {
            tracing::info!("repeat times: {}", i);

            if should_restart(start_time.elapsed(), budget, i) {
                self.workload.stop(session).await?;
                workload = self.workload.start().await?;
                start_time = Instant::now();
                summary.restarts += 1;
            }

            self.adjust(i, &boundary).await?;
            summary.iterations += 1;
        }
        tracing::debug!("Last workload {} ({})", workload.id(), workload.sub_test());

        tracing::info!("Verify guest still alive");
        self.context
            .vm
            .verify_alive()
            .await
            .map_err(StressError::Liveness)?;

        Ok(summary)
    }

    async fn adjust(&mut self, iteration: u32, boundary: &MemoryBoundary) -> Result<()> {
        let target = boundary.random_target(&mut self.rng);
        tracing::debug!("Balloon to {} MB", target);
        self.context
            .balloon
            .balloon_memory(target)
            .await
            .map_err(|source| StressError::Adjustment {
                iteration,
                target,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GuestError, Phase};
    use crate::mock::{MockBalloon, MockGuest, MockVm};

    struct Fixture {
        guest: MockGuest,
        vm: MockVm,
        balloon: MockBalloon,
    }

    impl Fixture {
        fn new(min: u64, max: u64) -> Self {
            let guest = MockGuest::new("wmplayer.exe");
            let vm = MockVm::new(&guest);
            let balloon = MockBalloon::attached(&guest, min, max);
            Self { guest, vm, balloon }
        }

        fn orchestrator(&self, repeat_times: u32, time_for_video: f64) -> StressOrchestrator {
            let mut stress = StressConfig::new("balloon");
            stress.repeat_times = repeat_times;
            stress.time_for_video = time_for_video;
            stress.seed = Some(1234);

            let mut workload = WorkloadConfig::new("win_video_play");
            workload.target_process = r"wmplayer\.exe".into();

            let context = StressContext {
                vm: Arc::new(self.vm.clone()),
                channel: Arc::new(self.guest.clone()),
                balloon: Arc::new(self.balloon.clone()),
                runner: Arc::new(self.guest.clone()),
            };
            StressOrchestrator::new(stress, workload, context).unwrap()
        }
    }

    #[test]
    fn restart_rule() {
        let budget = Duration::from_secs(240);
        assert!(!should_restart(Duration::from_secs(240), budget, 0));
        assert!(should_restart(Duration::from_secs(241), budget, 0));
        assert!(should_restart(Duration::from_secs(241), budget, 499));
        assert!(!should_restart(Duration::from_secs(241), budget, 500));
        assert!(!should_restart(Duration::from_secs(10_000), budget, 750));
    }

    #[tokio::test(start_paused = true)]
    async fn one_adjustment_per_iteration_within_boundary() {
        let fx = Fixture::new(1024, 4096);
        let summary = fx.orchestrator(50, 240.0).run().await.unwrap();

        assert_eq!(summary.iterations, 50);
        assert_eq!(summary.restarts, 0);
        let targets = fx.balloon.targets();
        assert_eq!(targets.len(), 50);
        assert!(targets.iter().all(|t| (1024..4096).contains(t)));
        assert_eq!(fx.balloon.boundary_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_sequence_order() {
        let fx = Fixture::new(1024, 4096);
        fx.orchestrator(2, 240.0).run().await.unwrap();

        assert_eq!(fx.vm.verify_calls(), 2);
        assert_eq!(fx.vm.login_timeouts(), vec![Duration::from_secs(360)]);
        assert_eq!(fx.vm.verifier_drivers(), vec!["balloon"]);
        assert_eq!(fx.guest.launches(), vec!["win_video_play"]);
        assert_eq!(fx.guest.sessions_opened(), 1);
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    // Real clock: elapsed time must be strictly positive before iteration 0.
    #[tokio::test]
    async fn zero_budget_restarts_before_every_adjustment() {
        let fx = Fixture::new(1024, 4096);
        let summary = fx.orchestrator(3, 0.0).run().await.unwrap();

        assert_eq!(summary.restarts, 3);
        assert_eq!(fx.balloon.targets().len(), 3);
        // Initial start plus one per iteration.
        assert_eq!(fx.guest.launches().len(), 4);

        let events = fx.guest.events();
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| e.split(' ').next().unwrap_or(""))
            .collect();
        assert_eq!(
            kinds,
            vec![
                "launch", "cmd", "launch", "balloon", "cmd", "launch", "balloon", "cmd",
                "launch", "balloon"
            ]
        );
        // Only one workload instance is ever running.
        assert_eq!(fx.guest.processes(), vec!["wmplayer.exe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_budget_expires() {
        let fx = Fixture::new(1024, 4096);
        fx.balloon.set_latency(Duration::from_secs(100));
        // 100s per adjustment: elapsed exceeds 240s before iterations 3 and 6.
        let summary = fx.orchestrator(7, 240.0).run().await.unwrap();

        assert_eq!(summary.restarts, 2);
        assert_eq!(fx.balloon.targets().len(), 7);
    }

    #[tokio::test]
    async fn no_restarts_past_iteration_limit() {
        let fx = Fixture::new(1024, 4096);
        let summary = fx.orchestrator(RESTART_ITERATION_LIMIT + 5, 0.0).run().await.unwrap();

        assert_eq!(summary.iterations, RESTART_ITERATION_LIMIT + 5);
        assert_eq!(summary.restarts, RESTART_ITERATION_LIMIT);
        assert_eq!(fx.guest.launches().len() as u32, RESTART_ITERATION_LIMIT + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_boundary_targets_min() {
        let fx = Fixture::new(100, 100);
        fx.orchestrator(10, 240.0).run().await.unwrap();

        assert_eq!(fx.balloon.targets(), vec![100; 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_that_never_starts_aborts_before_adjustment() {
        let fx = Fixture::new(1024, 4096);
        fx.guest.materialize_launches(1);

        let err = fx.orchestrator(3, 0.0).run().await.unwrap_err();

        assert_eq!(err.phase(), Phase::Start);
        assert!(matches!(err, StressError::WorkloadNotStarted { .. }));
        // The virtual clock has not moved before iteration 0, so the failed
        // restart happens at iteration 1, before its adjustment.
        assert_eq!(fx.balloon.targets().len(), 1);
        assert_eq!(fx.guest.launches().len(), 2);
        assert_eq!(fx.vm.verify_calls(), 1);
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_adjustment_aborts_run() {
        let fx = Fixture::new(1024, 4096);
        fx.balloon.fail_on_adjustment(4);

        let err = fx.orchestrator(10, 240.0).run().await.unwrap_err();

        assert!(matches!(err, StressError::Adjustment { iteration: 3, .. }));
        assert_eq!(fx.balloon.targets().len(), 4);
        // No final liveness check after an abort.
        assert_eq!(fx.vm.verify_calls(), 1);
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_liveness_failure_fails_run() {
        let fx = Fixture::new(1024, 4096);
        fx.vm.fail_verify_on_call(2);

        let err = fx.orchestrator(5, 240.0).run().await.unwrap_err();

        assert_eq!(err.phase(), Phase::FinalLiveness);
        assert_eq!(fx.balloon.targets().len(), 5);
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boot_failure_never_logs_in() {
        let fx = Fixture::new(1024, 4096);
        fx.vm.fail_verify_on_call(1);

        let err = fx.orchestrator(5, 240.0).run().await.unwrap_err();

        assert!(matches!(err, StressError::Boot(GuestError::NotAlive(_))));
        assert_eq!(fx.guest.sessions_opened(), 0);
        assert!(fx.guest.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn login_failure_is_fatal() {
        let fx = Fixture::new(1024, 4096);
        fx.vm.fail_next_login("guest login");

        let err = fx.orchestrator(5, 240.0).run().await.unwrap_err();

        assert_eq!(err.phase(), Phase::Login);
        assert!(fx.guest.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn verifier_failure_closes_session() {
        let fx = Fixture::new(1024, 4096);
        fx.vm.fail_next_verifier();

        let err = fx.orchestrator(5, 240.0).run().await.unwrap_err();

        assert!(matches!(err, StressError::DriverVerifier { ref driver, .. } if driver == "balloon"));
        assert!(fx.guest.launches().is_empty());
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_failure_is_fatal() {
        let fx = Fixture::new(1024, 4096);
        fx.balloon.fail_boundary("balloon device missing");

        let err = fx.orchestrator(5, 240.0).run().await.unwrap_err();

        assert_eq!(err.phase(), Phase::Boundary);
        assert!(fx.balloon.targets().is_empty());
        assert_eq!(fx.guest.sessions_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_runs_repeat_targets() {
        let first = Fixture::new(512, 8192);
        first.orchestrator(20, 240.0).run().await.unwrap();
        let second = Fixture::new(512, 8192);
        second.orchestrator(20, 240.0).run().await.unwrap();

        assert_eq!(first.balloon.targets(), second.balloon.targets());
    }

    #[test]
    fn new_rejects_invalid_stress_config() {
        let guest = MockGuest::new("wmplayer.exe");
        let context = StressContext {
            vm: Arc::new(MockVm::new(&guest)),
            channel: Arc::new(guest.clone()),
            balloon: Arc::new(MockBalloon::new(1, 2)),
            runner: Arc::new(guest.clone()),
        };
        let mut stress = StressConfig::new("balloon");
        stress.repeat_times = 0;

        let result =
            StressOrchestrator::new(stress, WorkloadConfig::new("win_video_play"), context);
        assert!(matches!(result, Err(StressError::Config(_))));
    }
}
