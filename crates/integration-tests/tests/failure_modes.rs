//! Startup failures, crashes and stubborn processes with real child processes

#![cfg(unix)]

mod common;

use futures::StreamExt;
use std::time::{Duration, Instant};

use conductor_core::application::{LivenessEvent, ShutdownReason};
use conductor_core::domain::{ServiceSpec, ServiceState};
use conductor_core::StartupError;
use tempfile::TempDir;

use common::*;

#[tokio::test]
async fn test_readiness_timeout_rolls_back_started_services() {
    let dir = TempDir::new().unwrap();
    let actions = sh("actions", dir.path(), "exec sleep 30");
    let rasa = sh_ready_on("rasa", dir.path(), "exec sleep 30", "never printed")
        .with_dependency("actions")
        .with_startup_timeout(Duration::from_millis(300));
    let webhook = sh("webhook", dir.path(), "exec sleep 30").with_dependency("rasa");

    let supervisor = supervisor(fast_settings());
    let err = supervisor
        .start(vec![actions, rasa, webhook])
        .await
        .unwrap_err();

    assert!(matches!(err, StartupError::ReadinessTimeout { ref name, .. } if name == "rasa"));
    assert!(supervisor.handle("webhook").await.is_none());

    let handles = supervisor.handles().await;
    assert_eq!(handles.len(), 2);
    for handle in handles {
        assert_eq!(handle.state, ServiceState::Stopped);
        let pid = handle.pid.unwrap();
        assert!(wait_until_dead(pid, Duration::from_secs(2)).await);
    }
}

#[tokio::test]
async fn test_process_exiting_during_startup_is_launch_failure() {
    let dir = TempDir::new().unwrap();
    let rasa = sh_ready_on("rasa", dir.path(), "echo 'missing model' >&2; exit 1", "never printed");

    let supervisor = supervisor(fast_settings());
    let err = supervisor.start(vec![rasa.clone()]).await.unwrap_err();

    match err {
        StartupError::LaunchFailure { name, cause } => {
            assert_eq!(name, "rasa");
            assert!(cause.contains("exit code 1"), "cause: {}", cause);
        }
        other => panic!("expected launch failure, got {:?}", other),
    }
    let handle = supervisor.handle("rasa").await.unwrap();
    assert_eq!(handle.state, ServiceState::Crashed);
    assert_eq!(handle.exit_code, Some(1));
    // Logs stay on disk for diagnosis
    assert!(read_log(&rasa).contains("missing model"));
}

#[tokio::test]
async fn test_missing_executable_stops_siblings() {
    let dir = TempDir::new().unwrap();
    let actions = sh("actions", dir.path(), "exec sleep 30");
    let ngrok = ServiceSpec::new("ngrok", "/nonexistent/ngrok", dir.path().join("ngrok.log"))
        .with_args(["http", "5000"])
        .with_dependency("actions");

    let supervisor = supervisor(fast_settings());
    let err = supervisor.start(vec![actions, ngrok]).await.unwrap_err();

    assert!(matches!(err, StartupError::LaunchFailure { ref name, .. } if name == "ngrok"));
    assert_eq!(
        supervisor.handle("actions").await.map(|h| h.state),
        Some(ServiceState::Stopped)
    );
}

#[tokio::test]
async fn test_crash_is_reported_once_and_stops_dependents() {
    let dir = TempDir::new().unwrap();
    let actions = sh("actions", dir.path(), "sleep 1; exit 3");
    let rasa = sh("rasa", dir.path(), "exec sleep 30").with_dependency("actions");
    let unrelated = sh("metrics", dir.path(), "exec sleep 30");

    let supervisor = supervisor(fast_settings());
    supervisor
        .start(vec![actions, rasa, unrelated])
        .await
        .unwrap();
    let rasa_pid = supervisor.handle("rasa").await.unwrap().pid.unwrap();

    let events = supervisor.monitor();
    tokio::pin!(events);
    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap();

    assert_eq!(
        first,
        Some(LivenessEvent::Exited {
            name: "actions".into(),
            exit_code: Some(3),
        })
    );
    assert_eq!(
        second,
        Some(LivenessEvent::DependentStopped {
            name: "rasa".into(),
            upstream: "actions".into(),
        })
    );
    assert!(tokio::time::timeout(Duration::from_millis(300), events.next())
        .await
        .is_err());

    assert_eq!(
        supervisor.handle("actions").await.map(|h| h.state),
        Some(ServiceState::Crashed)
    );
    assert!(wait_until_dead(rasa_pid, Duration::from_secs(2)).await);
    assert_eq!(
        supervisor.handle("metrics").await.map(|h| h.state),
        Some(ServiceState::Running)
    );

    let report = supervisor.shutdown(ShutdownReason::Requested).await;
    assert_eq!(report.stopped, vec!["metrics"]);
}

#[tokio::test]
async fn test_crashed_service_takes_its_background_children_down() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("worker.pid");
    let script = format!(
        "sleep 300 & echo $! > {}; echo up; sleep 0.5; exit 3",
        pid_file.display()
    );
    let actions = sh_ready_on("actions", dir.path(), &script, "up");

    let supervisor = supervisor(fast_settings());
    supervisor.start(vec![actions]).await.unwrap();
    let worker = read_pid_file(&pid_file, Duration::from_secs(2)).await;

    let events = supervisor.monitor();
    tokio::pin!(events);
    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap();

    assert_eq!(
        first,
        Some(LivenessEvent::Exited {
            name: "actions".into(),
            exit_code: Some(3),
        })
    );
    assert!(
        wait_until_dead(worker, Duration::from_secs(2)).await,
        "background child {} outlived its crashed service",
        worker
    );
}

#[tokio::test]
async fn test_sigterm_ignoring_service_is_killed_after_grace() {
    let dir = TempDir::new().unwrap();
    let stubborn = sh_ready_on(
        "stubborn",
        dir.path(),
        "trap '' TERM; echo armed; exec sleep 30",
        "armed",
    );

    let mut settings = fast_settings();
    settings.grace_period_ms = 300;
    let supervisor = supervisor(settings);
    supervisor.start(vec![stubborn]).await.unwrap();
    let pid = supervisor.handle("stubborn").await.unwrap().pid.unwrap();

    let started = Instant::now();
    let report = supervisor.shutdown(ShutdownReason::Requested).await;
    let elapsed = started.elapsed();

    assert_eq!(report.force_killed, vec!["stubborn"]);
    assert_eq!(report.stopped, vec!["stubborn"]);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5), "shutdown took {:?}", elapsed);
    assert!(wait_until_dead(pid, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_cycle_launches_no_process() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("launched");
    let script = format!("touch '{}'; exec sleep 30", marker.display());
    let a = sh("a", dir.path(), &script).with_dependency("b");
    let b = sh("b", dir.path(), &script).with_dependency("a");

    let supervisor = supervisor(fast_settings());
    let err = supervisor.start(vec![a, b]).await.unwrap_err();

    assert!(matches!(err, StartupError::CyclicDependency { .. }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());
    assert!(supervisor.handles().await.is_empty());
}
