//! Print the resolved configuration.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;

/// Run the validate command. The config has already been validated.
pub fn run(path: &Path, config: &Config) -> Result<()> {
    let stress = &config.stress;
    let workload = &config.workload;
    let guest = &config.guest;
    let monitor = &config.monitor;

    println!("=== balloon-stress config: {} ===", path.display());
    println!();
    println!("Stress:");
    println!("  Repeat times:   {}", stress.repeat_times);
    println!("  Time for video: {}s", stress.time_for_video);
    println!("  Login timeout:  {}s", stress.login_timeout);
    println!("  Driver:         {}", stress.driver_name);
    match stress.seed {
        Some(seed) => println!("  Seed:           {}", seed),
        None => println!("  Seed:           random"),
    }
    println!();
    println!("Workload:");
    println!("  Sub-test:       {}", workload.video_test);
    println!("  Process:        /{}/", workload.target_process);
    println!("  Check command:  {}", workload.check_running_cmd);
    println!("  Clean command:  {}", workload.clean_cmd);
    println!("  Launch command: {}", config.runner.command_for(&workload.video_test));
    println!(
        "  Start wait:     {}s (poll every {}s)",
        workload.start_timeout_secs, workload.poll_interval_secs
    );
    println!();
    println!("Guest:");
    println!("  SSH:            {}@{}:{}", guest.user, guest.host, guest.port);
    println!();
    println!("Monitor:");
    println!("  QMP socket:     {}", monitor.qmp_socket.display());
    match monitor.mem_mb {
        Some(mem) => println!("  Memory:         {} MB", mem),
        None => println!("  Memory:         from balloon device"),
    }
    println!("  Min memory:     {} MB", monitor.min_mem_mb);
    println!(
        "  Floor probe:    {}",
        if monitor.probe_floor { "on" } else { "off" }
    );
    println!();
    println!("Config OK");

    Ok(())
}
