//! End-to-end stress scenarios against the mock collaborators.

use std::sync::Arc;

use balloon_stress_core::mock::{MockBalloon, MockGuest, MockVm};
use balloon_stress_core::{
    Phase, StressConfig, StressContext, StressOrchestrator, WorkloadConfig, WorkloadController,
};

fn workload_config() -> WorkloadConfig {
    let mut config = WorkloadConfig::new("win_video_play");
    config.target_process = r"wmplayer\.exe".into();
    config
}

fn context(guest: &MockGuest, vm: &MockVm, balloon: &MockBalloon) -> StressContext {
    StressContext {
        vm: Arc::new(vm.clone()),
        channel: Arc::new(guest.clone()),
        balloon: Arc::new(balloon.clone()),
        runner: Arc::new(guest.clone()),
    }
}

#[tokio::test(start_paused = true)]
async fn targets_in_range_for_many_seeds() {
    for seed in 0..20 {
        let guest = MockGuest::new("wmplayer.exe");
        let vm = MockVm::new(&guest);
        let balloon = MockBalloon::new(700, 3000);

        let mut stress = StressConfig::new("balloon");
        stress.repeat_times = 25;
        stress.seed = Some(seed);

        let mut orchestrator =
            StressOrchestrator::new(stress, workload_config(), context(&guest, &vm, &balloon))
                .unwrap();
        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.run_id, orchestrator.run_id());
        let targets = balloon.targets();
        assert_eq!(targets.len(), 25, "seed {}", seed);
        assert!(
            targets.iter().all(|t| (700..3000).contains(t)),
            "seed {} produced {:?}",
            seed,
            targets
        );
    }
}

#[tokio::test(start_paused = true)]
async fn start_then_stop_leaves_nothing_running() {
    let guest = MockGuest::new("wmplayer.exe");
    let controller = WorkloadController::new(
        workload_config(),
        Arc::new(guest.clone()),
        Arc::new(guest.clone()),
    )
    .unwrap();

    controller.start().await.unwrap();
    assert!(controller.is_running().await.unwrap().is_some());

    let session = guest.session();
    controller.stop(&session).await.unwrap();
    assert_eq!(controller.is_running().await.unwrap(), None);

    // Stopping again is not an error and sends nothing.
    controller.stop(&session).await.unwrap();
    assert_eq!(guest.session_commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn initial_start_failure_reports_start_phase() {
    let guest = MockGuest::new("wmplayer.exe");
    guest.materialize_launches(0);
    let vm = MockVm::new(&guest);
    let balloon = MockBalloon::new(700, 3000);

    let mut orchestrator = StressOrchestrator::new(
        StressConfig::new("balloon"),
        workload_config(),
        context(&guest, &vm, &balloon),
    )
    .unwrap();
    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.phase(), Phase::Start);
    assert_eq!(balloon.boundary_calls(), 0);
    assert!(balloon.targets().is_empty());
    assert_eq!(guest.sessions_closed(), 1);
}
