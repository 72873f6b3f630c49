// Ordered, bounded shutdown (SIGTERM, grace period, SIGKILL)

use std::sync::atomic::Ordering;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::constants::{KILL_REAP_TIMEOUT, STOP_POLL_INTERVAL};
use super::{ShutdownReason, ShutdownReport, Supervisor};
use crate::domain::{ServiceName, ServiceState};

impl Supervisor {
    /// Stop every tracked service, dependents before their dependencies
    ///
    /// Bounded: each dependency wave waits at most the grace period before
    /// SIGKILL, plus a short reap timeout. Idempotent: a second call returns
    /// at once with `already_shut_down` set and signals nothing.
    pub async fn shutdown(&self, reason: ShutdownReason) -> ShutdownReport {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!(reason = %reason, "Shutdown already performed, ignoring");
            return ShutdownReport {
                already_shut_down: true,
                ..Default::default()
            };
        }

        // Cancels readiness polling of any in-flight start()
        self.inner.shutdown_tx.shutdown();

        info!(run_id = %self.inner.run_id, reason = %reason, "Shutting down services");
        let names = self
            .inner
            .registry
            .lock()
            .await
            .live_in_reverse_launch_order();
        let report = self.stop_services(&names, &reason).await;

        info!(
            run_id = %self.inner.run_id,
            stopped = ?report.stopped,
            force_killed = ?report.force_killed,
            "Shutdown complete"
        );
        report
    }

    /// Stop the named services in waves, deepest dependents first
    pub(crate) async fn stop_services(
        &self,
        names: &[ServiceName],
        reason: &ShutdownReason,
    ) -> ShutdownReport {
        let waves = self.inner.registry.lock().await.graph.shutdown_waves(names);
        let mut report = ShutdownReport::default();

        for wave in waves {
            let signalled = self.signal_wave(&wave, reason).await;
            if !signalled.is_empty() {
                self.reap_wave(signalled, &mut report).await;
            }
        }
        report
    }

    /// Move each service to STOPPING and send SIGTERM; returns names to reap
    async fn signal_wave(&self, wave: &[ServiceName], reason: &ShutdownReason) -> Vec<ServiceName> {
        let mut registry = self.inner.registry.lock().await;
        let mut pending = Vec::with_capacity(wave.len());

        for name in wave {
            let Some(entry) = registry.get_mut(name) else {
                continue;
            };
            match entry.handle.state {
                state if state.is_terminal() => continue,
                // Another stop pass already signalled it; only wait for the exit
                ServiceState::Stopping => {
                    pending.push(name.clone());
                    continue;
                }
                _ => {}
            }

            if let Err(e) = entry.handle.begin_stop() {
                warn!(service = %name, error = %e, "Cannot stop service");
                continue;
            }

            info!(
                service = %name,
                pid = ?entry.handle.pid,
                reason = %reason,
                "Sending SIGTERM"
            );
            if let Some(process) = entry.process.as_mut() {
                if let Err(e) = process.terminate() {
                    warn!(service = %name, error = %e, "SIGTERM failed");
                }
            }
            pending.push(name.clone());
        }
        pending
    }

    /// Wait for voluntary exit, then SIGKILL stragglers
    async fn reap_wave(&self, names: Vec<ServiceName>, report: &mut ShutdownReport) {
        let deadline = Instant::now() + self.inner.settings.grace_period();
        let mut remaining = names;

        loop {
            remaining = self.reap_exited(remaining, report).await;
            if remaining.is_empty() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }

        {
            let mut registry = self.inner.registry.lock().await;
            for name in &remaining {
                let Some(entry) = registry.get_mut(name) else {
                    continue;
                };
                if entry.handle.state != ServiceState::Stopping {
                    continue;
                }
                warn!(
                    service = %name,
                    pid = ?entry.handle.pid,
                    "Process did not exit after SIGTERM, sending SIGKILL"
                );
                if let Some(process) = entry.process.as_mut() {
                    if let Err(e) = process.force_kill() {
                        error!(service = %name, error = %e, "SIGKILL failed");
                    }
                }
                report.force_killed.push(name.clone());
            }
        }

        let kill_deadline = Instant::now() + KILL_REAP_TIMEOUT;
        loop {
            remaining = self.reap_exited(remaining, report).await;
            if remaining.is_empty() || Instant::now() >= kill_deadline {
                break;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }

        if !remaining.is_empty() {
            let now = self.now_millis();
            let mut registry = self.inner.registry.lock().await;
            for name in remaining {
                let Some(entry) = registry.get_mut(&name) else {
                    continue;
                };
                if entry.handle.mark_stopped(None, now).is_ok() {
                    error!(service = %name, "Process not reaped after SIGKILL, abandoning handle");
                    report.stopped.push(name);
                }
            }
        }
    }

    /// Mark exited services STOPPED; returns those still running
    async fn reap_exited(
        &self,
        names: Vec<ServiceName>,
        report: &mut ShutdownReport,
    ) -> Vec<ServiceName> {
        let now = self.now_millis();
        let mut registry = self.inner.registry.lock().await;
        let mut still_running = Vec::new();

        for name in names {
            let Some(entry) = registry.get_mut(&name) else {
                continue;
            };
            if entry.handle.state != ServiceState::Stopping {
                // Reaped by a concurrent stop pass
                continue;
            }

            let exit = match entry.process.as_mut() {
                Some(process) => match process.try_wait() {
                    Ok(exit) => exit.map(|e| e.code),
                    Err(e) => {
                        warn!(service = %name, error = %e, "Failed to poll process exit");
                        None
                    }
                },
                None => Some(None),
            };

            match exit {
                Some(code) => {
                    if let Err(e) = entry.handle.mark_stopped(code, now) {
                        warn!(service = %name, error = %e, "Unexpected state while stopping");
                        continue;
                    }
                    info!(service = %name, exit_code = ?code, "Service stopped");
                    report.stopped.push(name);
                }
                None => still_running.push(name),
            }
        }
        still_running
    }
}
