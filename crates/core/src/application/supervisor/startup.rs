// Dependency-ordered startup with readiness polling and rollback

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::constants::PROBE_CALL_TIMEOUT;
use super::registry::Registry;
use super::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use super::{ShutdownReason, Supervisor};
use crate::application::backoff::ReadinessSchedule;
use crate::domain::{DependencyGraph, ServiceHandle, ServiceSpec, ServiceState};
use crate::error::StartupError;
use crate::port::{ProbeContext, ProbeOutcome};

/// What a service published to its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartSignal {
    Pending,
    Running,
    Failed,
}

/// Outcome of one service's startup future
#[derive(Debug, PartialEq, Eq)]
enum StartOutcome {
    Running,
    Skipped,
}

/// Startup is cancelled by a failing sibling (abort) or by `shutdown()` (global)
struct Cancellation {
    abort: ShutdownToken,
    global: ShutdownToken,
}

impl Cancellation {
    fn is_cancelled(&self) -> bool {
        self.abort.is_shutdown() || self.global.is_shutdown()
    }

    async fn wait(&mut self) {
        tokio::select! {
            _ = self.abort.wait() => {},
            _ = self.global.wait() => {},
        }
    }
}

impl Supervisor {
    /// Start services in dependency order
    ///
    /// Each service launches once all of its predecessors are RUNNING, so
    /// independent branches start concurrently. A service becomes RUNNING
    /// after its readiness probe succeeds and one liveness check passes.
    ///
    /// # Errors
    /// - StartupError::CyclicDependency / InvalidSpec: nothing is launched
    /// - StartupError::ReadinessTimeout / LaunchFailure: every service started
    ///   by this call is stopped (reverse start order) before returning
    /// - StartupError::LaunchFailure naming a predecessor: it exited before
    ///   its dependent reached RUNNING
    /// - StartupError::Interrupted: `shutdown()` was called meanwhile
    /// - StartupError::AlreadyStarted: `start()` was already called on this run
    pub async fn start(
        &self,
        specs: Vec<ServiceSpec>,
    ) -> Result<Vec<ServiceHandle>, StartupError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(StartupError::AlreadyStarted);
        }
        if self.is_shut_down() {
            return Err(StartupError::Interrupted);
        }

        let graph = DependencyGraph::build(&specs)?;
        info!(
            run_id = %self.inner.run_id,
            order = ?graph.order(),
            "Starting services in dependency order"
        );
        self.inner.registry.lock().await.graph = graph.clone();

        let (abort_tx, abort_token) = shutdown_channel();
        let global_token = self.shutdown_token();

        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for name in graph.order() {
            let (tx, rx) = watch::channel(StartSignal::Pending);
            senders.insert(name.clone(), tx);
            receivers.insert(name.clone(), rx);
        }

        let by_name: HashMap<&str, &ServiceSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut startups = Vec::with_capacity(specs.len());
        for name in graph.order() {
            let (Some(spec), Some(tx)) = (by_name.get(name.as_str()), senders.remove(name)) else {
                return Err(StartupError::Internal(format!(
                    "service '{}' missing from startup plan",
                    name
                )));
            };
            let predecessors: Vec<watch::Receiver<StartSignal>> = graph
                .predecessors(name)
                .iter()
                .filter_map(|p| receivers.get(p).cloned())
                .collect();
            let cancel = Cancellation {
                abort: abort_token.clone(),
                global: global_token.clone(),
            };
            startups.push(self.start_service(spec, predecessors, tx, &abort_tx, cancel));
        }

        let span = info_span!("startup", run_id = %self.inner.run_id);
        let results = join_all(startups).instrument(span).await;

        let errors: Vec<StartupError> = results.into_iter().filter_map(Result::err).collect();
        let Some(err) = errors
            .iter()
            .find(|e| **e != StartupError::Interrupted)
            .or_else(|| errors.first())
            .cloned()
        else {
            let handles = self.handles().await;
            info!(
                run_id = %self.inner.run_id,
                services = handles.len(),
                "All services running"
            );
            return Ok(handles);
        };

        error!(error = %err, "Startup failed, stopping services started so far");
        let culprit = err.service().unwrap_or("supervisor").to_string();
        let names = self.inner.registry.lock().await.live_in_reverse_launch_order();
        let report = self
            .stop_services(&names, &ShutdownReason::StartupFailure(culprit))
            .await;
        info!(stopped = ?report.stopped, "Startup rollback complete");

        Err(err)
    }

    /// Wait for predecessors, then launch one service and wait until it runs
    async fn start_service(
        &self,
        spec: &ServiceSpec,
        predecessors: Vec<watch::Receiver<StartSignal>>,
        signal: watch::Sender<StartSignal>,
        abort: &ShutdownSender,
        mut cancel: Cancellation,
    ) -> Result<StartOutcome, StartupError> {
        for mut rx in predecessors {
            let outcome = tokio::select! {
                res = rx.wait_for(|s| *s != StartSignal::Pending) => {
                    res.map(|s| *s).unwrap_or(StartSignal::Failed)
                }
                _ = cancel.wait() => StartSignal::Failed,
            };
            if outcome != StartSignal::Running {
                debug!(service = %spec.name, "Not launching: a predecessor did not start");
                signal.send_replace(StartSignal::Failed);
                return Ok(StartOutcome::Skipped);
            }
        }

        if cancel.is_cancelled() {
            signal.send_replace(StartSignal::Failed);
            return Ok(StartOutcome::Skipped);
        }

        match self.launch_until_running(spec, &mut cancel).await {
            Ok(()) => {
                signal.send_replace(StartSignal::Running);
                Ok(StartOutcome::Running)
            }
            Err(e) => {
                signal.send_replace(StartSignal::Failed);
                abort.shutdown();
                Err(e)
            }
        }
    }

    async fn launch_until_running(
        &self,
        spec: &ServiceSpec,
        cancel: &mut Cancellation,
    ) -> Result<(), StartupError> {
        self.ensure_predecessors_running(spec).await?;
        let mut handle = ServiceHandle::new(&spec.name);

        info!(
            service = %spec.name,
            command = %spec.command,
            args = ?spec.args,
            log_path = %spec.log_path.display(),
            "Launching service"
        );

        let process = match self.inner.launcher.launch(spec).await {
            Ok(process) => process,
            Err(e) => {
                error!(service = %spec.name, error = %e, "Launch failed");
                handle.mark_crashed(None, self.now_millis())?;
                self.inner.registry.lock().await.insert(handle, None);
                return Err(StartupError::LaunchFailure {
                    name: spec.name.clone(),
                    cause: e.to_string(),
                });
            }
        };

        let ctx = ProbeContext {
            pid: process.pid(),
            log_offset: process.log_offset(),
        };
        handle.begin_start(process.pid(), self.now_millis())?;
        self.inner
            .registry
            .lock()
            .await
            .insert(handle, Some(process));

        debug!(service = %spec.name, pid = ?ctx.pid, "Service process spawned");

        self.await_ready(spec, &ctx, cancel).await?;
        self.promote_to_running(spec).await
    }

    /// Poll the readiness probe until ready, exited, cancelled or timed out
    async fn await_ready(
        &self,
        spec: &ServiceSpec,
        ctx: &ProbeContext,
        cancel: &mut Cancellation,
    ) -> Result<(), StartupError> {
        let timeout = self.inner.settings.startup_timeout_for(spec);
        let backoff = self.inner.settings.backoff_for(spec).clone();
        let mut schedule = ReadinessSchedule::new(&spec.name, backoff, timeout);

        loop {
            if cancel.is_cancelled() {
                return Err(StartupError::Interrupted);
            }
            self.ensure_alive(&spec.name, ServiceState::Starting).await?;

            let budget = PROBE_CALL_TIMEOUT.min(schedule.remaining());
            let outcome = tokio::select! {
                res = tokio::time::timeout(budget, self.inner.probe.check(spec, ctx)) => {
                    res.unwrap_or_else(|_| ProbeOutcome::NotReady("probe call timed out".to_string()))
                }
                _ = cancel.wait() => return Err(StartupError::Interrupted),
            };

            match outcome {
                ProbeOutcome::Ready => {
                    let mut registry = self.inner.registry.lock().await;
                    if registry.state(&spec.name) != Some(ServiceState::Starting) {
                        return Err(self.displaced(&registry, &spec.name));
                    }
                    let entry = registry
                        .get_mut(&spec.name)
                        .ok_or_else(|| missing_entry(&spec.name))?;
                    entry.handle.mark_ready()?;
                    info!(
                        service = %spec.name,
                        attempts = schedule.attempts() + 1,
                        elapsed_ms = schedule.elapsed().as_millis() as u64,
                        "Service ready"
                    );
                    return Ok(());
                }
                ProbeOutcome::NotReady(reason) => {
                    let Some(delay) = schedule.next_delay() else {
                        warn!(
                            service = %spec.name,
                            timeout_ms = timeout.as_millis() as u64,
                            last_reason = %reason,
                            "Readiness probe never succeeded"
                        );
                        return Err(StartupError::ReadinessTimeout {
                            name: spec.name.clone(),
                            waited_ms: schedule.elapsed().as_millis() as u64,
                        });
                    };
                    debug!(service = %spec.name, reason = %reason, "Service not ready yet");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = cancel.wait() => return Err(StartupError::Interrupted),
                    }
                }
            }
        }
    }

    /// Liveness check while the service is in `expected` state
    ///
    /// An exit marks the handle CRASHED and becomes a LaunchFailure.
    async fn ensure_alive(&self, name: &str, expected: ServiceState) -> Result<(), StartupError> {
        let now = self.now_millis();
        let mut registry = self.inner.registry.lock().await;
        let state = registry.state(name).ok_or_else(|| missing_entry(name))?;
        if state != expected {
            return Err(self.displaced(&registry, name));
        }
        let entry = registry.get_mut(name).ok_or_else(|| missing_entry(name))?;

        let exit = match entry.process.as_mut() {
            Some(process) => match process.try_wait() {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(service = %name, error = %e, "Liveness check failed");
                    None
                }
            },
            None => None,
        };

        if let Some(exit) = exit {
            entry.handle.mark_crashed(exit.code, now)?;
            error!(service = %name, exit = %exit, "Service exited during startup");
            return Err(StartupError::LaunchFailure {
                name: name.to_string(),
                cause: format!("exited during startup ({})", exit),
            });
        }
        Ok(())
    }

    /// READY -> RUNNING on the first successful liveness check,
    /// provided every predecessor is still alive
    async fn promote_to_running(&self, spec: &ServiceSpec) -> Result<(), StartupError> {
        let name = spec.name.as_str();
        self.ensure_alive(name, ServiceState::Ready).await?;
        self.ensure_predecessors_running(spec).await?;

        let now = self.now_millis();
        let mut registry = self.inner.registry.lock().await;
        if registry.state(name) != Some(ServiceState::Ready) {
            return Err(self.displaced(&registry, name));
        }
        let entry = registry.get_mut(name).ok_or_else(|| missing_entry(name))?;
        entry.handle.mark_running(now)?;
        info!(service = %name, pid = ?entry.handle.pid, "Service running");
        Ok(())
    }
}

impl Supervisor {
    /// Fail when a predecessor is no longer RUNNING or its process has exited
    ///
    /// An exited predecessor is marked CRASHED here and named in the error,
    /// so the rollback in `start()` covers it.
    async fn ensure_predecessors_running(&self, spec: &ServiceSpec) -> Result<(), StartupError> {
        let now = self.now_millis();
        let mut registry = self.inner.registry.lock().await;

        for predecessor in &spec.depends_on {
            let entry = registry
                .get_mut(predecessor)
                .ok_or_else(|| missing_entry(predecessor))?;
            match entry.handle.state {
                ServiceState::Running => {}
                _ if self.is_shut_down() => return Err(StartupError::Interrupted),
                state => {
                    return Err(StartupError::LaunchFailure {
                        name: predecessor.clone(),
                        cause: format!("{} before {} was running", state, spec.name),
                    })
                }
            }

            let exit = match entry.process.as_mut() {
                Some(process) => match process.try_wait() {
                    Ok(exit) => exit,
                    Err(e) => {
                        warn!(service = %predecessor, error = %e, "Liveness check failed");
                        None
                    }
                },
                None => None,
            };
            if let Some(exit) = exit {
                entry.handle.mark_crashed(exit.code, now)?;
                error!(
                    service = %predecessor,
                    dependent = %spec.name,
                    exit = %exit,
                    "Dependency exited while its dependent was starting"
                );
                return Err(StartupError::LaunchFailure {
                    name: predecessor.clone(),
                    cause: format!("exited before {} was running ({})", spec.name, exit),
                });
            }
        }
        Ok(())
    }

    /// Error for a starting service whose handle was moved on by someone else
    ///
    /// Only `shutdown()` yields Interrupted; a stop caused by crash
    /// propagation names the crashed upstream service.
    fn displaced(&self, registry: &Registry, name: &str) -> StartupError {
        if self.is_shut_down() {
            return StartupError::Interrupted;
        }
        match registry.crashed_upstream(name) {
            Some(upstream) => StartupError::LaunchFailure {
                cause: format!("crashed while {} was starting", name),
                name: upstream,
            },
            None => StartupError::LaunchFailure {
                name: name.to_string(),
                cause: "stopped during startup".to_string(),
            },
        }
    }
}

fn missing_entry(name: &str) -> StartupError {
    StartupError::Internal(format!("no handle registered for '{}'", name))
}
