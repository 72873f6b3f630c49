//! `conductor up`: start the fleet, supervise it, shut it down

use anyhow::{anyhow, Result};
use colored::Colorize;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{error, info, info_span, warn, Instrument};

use conductor_core::application::{LivenessEvent, ShutdownReason, ShutdownReport, Supervisor};
use conductor_core::domain::ServiceHandle;
use conductor_core::port::time_provider::SystemTimeProvider;
use conductor_core::StartupError;
use conductor_infra_system::{SystemReadinessProbe, TokioProcessLauncher};

use crate::config::ConductorConfig;
use crate::signals::ShutdownSignals;

#[derive(Tabled)]
struct HandleRow {
    service: String,
    pid: String,
    state: String,
}

impl From<&ServiceHandle> for HandleRow {
    fn from(handle: &ServiceHandle) -> Self {
        Self {
            service: handle.name.clone(),
            pid: handle
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            state: handle.state.to_string(),
        }
    }
}

pub async fn up(config: ConductorConfig, exit_on_crash: bool) -> Result<()> {
    // DI wiring
    let supervisor = Supervisor::new(
        Arc::new(TokioProcessLauncher::new()),
        Arc::new(SystemReadinessProbe::new()),
        Arc::new(SystemTimeProvider),
        config.supervisor.clone(),
    );
    let signals = ShutdownSignals::install()?.into_stream();
    let span = info_span!("run", run_id = %supervisor.run_id());
    run(supervisor, config, exit_on_crash, signals)
        .instrument(span)
        .await
}

/// Start the fleet and supervise it until `signals` yields or it fails
async fn run<S>(
    supervisor: Supervisor,
    config: ConductorConfig,
    exit_on_crash: bool,
    mut signals: S,
) -> Result<()>
where
    S: Stream<Item = String> + Unpin,
{
    info!(
        services = config.services.len(),
        log_dir = %config.log_dir.display(),
        "Starting fleet"
    );

    let start = supervisor.start(config.services);
    tokio::pin!(start);
    let started = tokio::select! {
        result = &mut start => result,
        Some(signal) = signals.next() => {
            info!(signal = %signal, "Signal received during startup");
            let report = supervisor.shutdown(ShutdownReason::Signal(signal)).await;
            print_report(&report);
            // Returns Interrupted once the in-flight startup has unwound
            start.await
        }
    };

    let handles = match started {
        Ok(handles) => handles,
        Err(StartupError::Interrupted) => {
            println!("{}", "Startup interrupted, all services stopped".yellow());
            return Ok(());
        }
        Err(e) => {
            println!("{}", format!("✗ {}", e).red().bold());
            println!("Check the service logs under {}", config.log_dir.display());
            return Err(e.into());
        }
    };

    println!("{}", "✓ All services running".green().bold());
    println!();
    let rows: Vec<HandleRow> = handles.iter().map(HandleRow::from).collect();
    println!("{}", Table::new(rows));
    println!("Press Ctrl+C to shutdown");

    let (reason, failure) = supervise(&supervisor, &mut signals, exit_on_crash).await;

    let report = supervisor.shutdown(reason).await;
    print_report(&report);

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Consume liveness events until a signal, a fatal crash or an empty fleet
///
/// Only a signal ends supervision without an error.
async fn supervise<S>(
    supervisor: &Supervisor,
    signals: &mut S,
    exit_on_crash: bool,
) -> (ShutdownReason, Option<anyhow::Error>)
where
    S: Stream<Item = String> + Unpin,
{
    let events = supervisor.monitor();
    tokio::pin!(events);

    loop {
        tokio::select! {
            Some(signal) = signals.next() => {
                info!(signal = %signal, "Shutdown signal received");
                return (ShutdownReason::Signal(signal), None);
            }
            Some(event) = events.next() => {
                report_event(&event);
                let upstream = event.name().to_string();

                if exit_on_crash {
                    if let Some(err) = event.into_error() {
                        error!(service = %upstream, "Crash is fatal (--exit-on-crash), shutting down");
                        return (
                            ShutdownReason::DependencyFailed(upstream),
                            Some(anyhow::Error::new(err)),
                        );
                    }
                }

                let handles = supervisor.handles().await;
                if handles.iter().all(|h| h.state.is_terminal()) {
                    warn!(last_failure = %upstream, "No services left running");
                    return (
                        ShutdownReason::DependencyFailed(upstream.clone()),
                        Some(anyhow!("No services left running (last failure: {})", upstream)),
                    );
                }
            }
        }
    }
}

fn report_event(event: &LivenessEvent) {
    match event {
        LivenessEvent::Exited { name, exit_code } => {
            let code = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            println!("{}", format!("✗ {} exited unexpectedly ({})", name, code).red().bold());
        }
        LivenessEvent::DependentStopped { name, upstream } => {
            println!("{}", format!("! {} stopped: depends on {}", name, upstream).yellow());
        }
    }
}

fn print_report(report: &ShutdownReport) {
    if report.already_shut_down {
        return;
    }
    println!(
        "{}",
        format!("✓ Stopped {} service(s)", report.stopped.len()).green()
    );
    if !report.force_killed.is_empty() {
        println!(
            "{}",
            format!("! Force-killed: {}", report.force_killed.join(", ")).yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::application::SupervisorSettings;
    use conductor_core::domain::{Backoff, ServiceSpec, ServiceState};
    use conductor_core::port::process::mocks::{MockBehavior, MockProcessLauncher};
    use conductor_core::port::readiness::mocks::{MockReadinessProbe, ProbeBehavior};
    use conductor_core::SupervisorError;
    use futures::stream::{self, BoxStream};
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(services: Vec<ServiceSpec>) -> ConductorConfig {
        ConductorConfig {
            supervisor: SupervisorSettings {
                grace_period_ms: 200,
                monitor_interval_ms: 20,
                default_startup_timeout_ms: 10_000,
                default_backoff: Backoff::Fixed { interval_ms: 10 },
            },
            log_dir: PathBuf::from("logs"),
            services,
        }
    }

    fn service(name: &str, deps: &[&str]) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, name, format!("logs/{}.log", name));
        spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
        spec
    }

    fn supervisor(
        launcher: &Arc<MockProcessLauncher>,
        probe: &Arc<MockReadinessProbe>,
        config: &ConductorConfig,
    ) -> Supervisor {
        Supervisor::new(
            launcher.clone(),
            probe.clone(),
            Arc::new(SystemTimeProvider),
            config.supervisor.clone(),
        )
    }

    fn signal_after(delay: Duration) -> BoxStream<'static, String> {
        stream::once(async move {
            tokio::time::sleep(delay).await;
            "SIGTERM".to_string()
        })
        .boxed()
    }

    async fn state_of(supervisor: &Supervisor, name: &str) -> Option<ServiceState> {
        supervisor.handle(name).await.map(|h| h.state)
    }

    #[tokio::test]
    async fn test_signal_during_startup_stops_fleet() {
        let launcher = Arc::new(MockProcessLauncher::new());
        let probe = Arc::new(MockReadinessProbe::new().with_behavior("rasa", ProbeBehavior::Never));
        let config = config(vec![service("actions", &[]), service("rasa", &["actions"])]);
        let supervisor = supervisor(&launcher, &probe, &config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(supervisor.clone(), config, false, signal_after(Duration::from_millis(100))),
        )
        .await
        .unwrap();

        tokio_test::assert_ok!(result);
        assert!(supervisor.is_shut_down());
        assert_eq!(launcher.terminated(), vec!["rasa", "actions"]);
        assert_eq!(state_of(&supervisor, "actions").await, Some(ServiceState::Stopped));
        assert_eq!(state_of(&supervisor, "rasa").await, Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_signal_while_supervising_stops_fleet() {
        let launcher = Arc::new(MockProcessLauncher::new());
        let probe = Arc::new(MockReadinessProbe::new());
        let config = config(vec![service("actions", &[]), service("rasa", &["actions"])]);
        let supervisor = supervisor(&launcher, &probe, &config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(supervisor.clone(), config, false, signal_after(Duration::from_millis(100))),
        )
        .await
        .unwrap();

        tokio_test::assert_ok!(result);
        assert_eq!(launcher.launched(), vec!["actions", "rasa"]);
        assert_eq!(state_of(&supervisor, "actions").await, Some(ServiceState::Stopped));
        assert_eq!(state_of(&supervisor, "rasa").await, Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_exit_on_crash_fails_with_unexpected_exit() {
        // Survives its own startup checks and both of rasa's
        let launcher = Arc::new(
            MockProcessLauncher::new().with_behavior("actions", MockBehavior::ExitsAfter { polls: 4, code: 137 }),
        );
        let probe = Arc::new(MockReadinessProbe::new());
        let config = config(vec![
            service("actions", &[]),
            service("rasa", &["actions"]),
            service("metrics", &[]),
        ]);
        let supervisor = supervisor(&launcher, &probe, &config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(supervisor.clone(), config, true, stream::pending::<String>()),
        )
        .await
        .unwrap();

        let err = tokio_test::assert_err!(result);
        match err.downcast_ref::<SupervisorError>() {
            Some(SupervisorError::UnexpectedExit { name, code }) => {
                assert_eq!(name, "actions");
                assert_eq!(*code, Some(137));
            }
            other => panic!("expected unexpected exit, got {:?}", other),
        }
        assert_eq!(state_of(&supervisor, "actions").await, Some(ServiceState::Crashed));
        assert_eq!(state_of(&supervisor, "rasa").await, Some(ServiceState::Stopped));
        assert_eq!(state_of(&supervisor, "metrics").await, Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_crash_without_exit_on_crash_keeps_survivors() {
        let launcher = Arc::new(
            MockProcessLauncher::new().with_behavior("actions", MockBehavior::ExitsAfter { polls: 2, code: 1 }),
        );
        let probe = Arc::new(MockReadinessProbe::new());
        let config = config(vec![service("actions", &[]), service("metrics", &[])]);
        let supervisor = supervisor(&launcher, &probe, &config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(supervisor.clone(), config, false, signal_after(Duration::from_millis(300))),
        )
        .await
        .unwrap();

        // The crash alone did not end the run; the signal did
        tokio_test::assert_ok!(result);
        assert_eq!(state_of(&supervisor, "actions").await, Some(ServiceState::Crashed));
        assert_eq!(state_of(&supervisor, "metrics").await, Some(ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_exits_with_error_once_no_service_is_left() {
        // Survives its own startup checks and both of rasa's
        let launcher = Arc::new(
            MockProcessLauncher::new().with_behavior("actions", MockBehavior::ExitsAfter { polls: 4, code: 1 }),
        );
        let probe = Arc::new(MockReadinessProbe::new());
        let config = config(vec![service("actions", &[]), service("rasa", &["actions"])]);
        let supervisor = supervisor(&launcher, &probe, &config);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(supervisor.clone(), config, false, stream::pending::<String>()),
        )
        .await
        .unwrap();

        let err = tokio_test::assert_err!(result);
        assert!(err.to_string().contains("No services left running"), "{}", err);
        assert_eq!(state_of(&supervisor, "actions").await, Some(ServiceState::Crashed));
        assert_eq!(state_of(&supervisor, "rasa").await, Some(ServiceState::Stopped));
    }
}
