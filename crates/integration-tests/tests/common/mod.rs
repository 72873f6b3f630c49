//! Shared fixtures: real `sh` services under a temporary log directory

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use conductor_core::application::{Supervisor, SupervisorSettings};
use conductor_core::domain::{Backoff, ReadinessCheck, ServiceSpec};
use conductor_core::port::time_provider::SystemTimeProvider;
use conductor_infra_system::{SystemReadinessProbe, TokioProcessLauncher};

pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        grace_period_ms: 1_000,
        monitor_interval_ms: 50,
        default_startup_timeout_ms: 5_000,
        default_backoff: Backoff::Fixed { interval_ms: 25 },
    }
}

pub fn supervisor(settings: SupervisorSettings) -> Supervisor {
    Supervisor::new(
        Arc::new(TokioProcessLauncher::new()),
        Arc::new(SystemReadinessProbe::new()),
        Arc::new(SystemTimeProvider),
        settings,
    )
}

/// A service running `sh -c script`, logging to `<dir>/<name>.log`
pub fn sh(name: &str, dir: &Path, script: &str) -> ServiceSpec {
    ServiceSpec::new(name, "sh", dir.join(format!("{}.log", name))).with_args(["-c", script])
}

/// Like `sh`, ready once `marker` shows up in its log
pub fn sh_ready_on(name: &str, dir: &Path, script: &str, marker: &str) -> ServiceSpec {
    sh(name, dir, script).with_readiness(ReadinessCheck::LogLine {
        pattern: marker.to_string(),
    })
}

pub fn read_log(spec: &ServiceSpec) -> String {
    std::fs::read_to_string(&spec.log_path).unwrap_or_default()
}

/// Whether `pid` is still running; an unreaped zombie counts as dead
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let state = stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next());
        if state == Some('Z') {
            return false;
        }
    }
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll until `path` holds a pid written by a service script
pub async fn read_pid_file(path: &Path, within: Duration) -> u32 {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no pid written to {}",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_until_dead(pid: u32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
