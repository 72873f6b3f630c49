// Liveness monitoring and crash propagation

use futures::stream::{self, Stream};
use std::collections::VecDeque;
use tracing::{error, warn};

use super::{LivenessEvent, ShutdownReason, Supervisor};
use crate::domain::ServiceState;

impl Supervisor {
    /// One liveness pass over every RUNNING service
    ///
    /// A process that has exited is marked CRASHED before its `Exited` event
    /// is produced; its non-terminal transitive dependents are then stopped
    /// and reported as `DependentStopped`. Services that are STARTING or
    /// STOPPING are left alone: startup and shutdown own them.
    pub async fn check_liveness(&self) -> Vec<LivenessEvent> {
        let now = self.now_millis();
        let mut crashed = Vec::new();

        {
            let mut registry = self.inner.registry.lock().await;
            for name in registry.names_in_state(ServiceState::Running) {
                let Some(entry) = registry.get_mut(&name) else {
                    continue;
                };
                let Some(process) = entry.process.as_mut() else {
                    continue;
                };

                match process.try_wait() {
                    Ok(None) => entry.handle.record_liveness(now),
                    Ok(Some(exit)) => {
                        if let Err(e) = entry.handle.mark_crashed(exit.code, now) {
                            warn!(service = %name, error = %e, "Cannot mark service crashed");
                            continue;
                        }
                        error!(
                            service = %name,
                            pid = ?entry.handle.pid,
                            exit = %exit,
                            "Service exited unexpectedly"
                        );
                        crashed.push((name, exit.code));
                    }
                    Err(e) => warn!(service = %name, error = %e, "Liveness check failed"),
                }
            }
        }

        let mut events = Vec::new();
        for (name, exit_code) in crashed {
            events.push(LivenessEvent::Exited {
                name: name.clone(),
                exit_code,
            });

            let dependents: Vec<_> = {
                let registry = self.inner.registry.lock().await;
                registry
                    .graph
                    .transitive_dependents(&name)
                    .into_iter()
                    .filter(|dep| {
                        matches!(
                            registry.state(dep),
                            Some(ServiceState::Starting | ServiceState::Ready | ServiceState::Running)
                        )
                    })
                    .collect()
            };
            if dependents.is_empty() {
                continue;
            }

            warn!(
                upstream = %name,
                dependents = ?dependents,
                "Stopping dependents of crashed service"
            );
            let mut ordered = dependents;
            ordered.reverse();
            let report = self
                .stop_services(&ordered, &ShutdownReason::DependencyFailed(name.clone()))
                .await;
            events.extend(report.stopped.into_iter().map(|dep| {
                LivenessEvent::DependentStopped {
                    name: dep,
                    upstream: name.clone(),
                }
            }));
        }
        events
    }

    /// Lazy, infinite stream of liveness events
    ///
    /// Polls every `monitor_interval`; each unexpected exit yields exactly one
    /// `Exited`. Dropping the stream stops monitoring. After shutdown it keeps
    /// polling but has nothing left to report; a fresh run needs a new
    /// Supervisor.
    pub fn monitor(&self) -> impl Stream<Item = LivenessEvent> + Send + 'static {
        let interval = self.inner.settings.monitor_interval();
        stream::unfold(
            (self.clone(), VecDeque::new()),
            move |(supervisor, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((event, (supervisor, pending)));
                    }
                    tokio::time::sleep(interval).await;
                    pending.extend(supervisor.check_liveness().await);
                }
            },
        )
    }
}
