// Supervisor - dependency-ordered startup, liveness monitoring, ordered shutdown

pub mod constants;
mod events;
mod monitor;
mod registry;
mod settings;
mod shutdown;
mod startup;
mod stop;

pub use events::{LivenessEvent, ShutdownReason, ShutdownReport};
pub use settings::SupervisorSettings;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{DependencyGraph, ServiceHandle, ServiceName, ServiceSpec};
use crate::error::StartupError;
use crate::port::{ProcessLauncher, ReadinessProbe, TimeProvider};
use registry::Registry;

struct Inner {
    run_id: Uuid,
    launcher: Arc<dyn ProcessLauncher>,
    probe: Arc<dyn ReadinessProbe>,
    time_provider: Arc<dyn TimeProvider>,
    settings: SupervisorSettings,
    registry: Mutex<Registry>,
    shutdown_tx: ShutdownSender,
    started: AtomicBool,
    shut_down: AtomicBool,
}

/// Process supervisor for one run
///
/// Cheap to clone; clones share the same handle set, so `monitor()` can run
/// on one task while another calls `start()` or `shutdown()`.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor
    ///
    /// # Example
    /// ```ignore
    /// let supervisor = Supervisor::new(
    ///     Arc::new(TokioProcessLauncher::new()),
    ///     Arc::new(SystemReadinessProbe::new()),
    ///     Arc::new(SystemTimeProvider),
    ///     SupervisorSettings::default(),
    /// );
    /// let handles = supervisor.start(specs).await?;
    /// ```
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        probe: Arc<dyn ReadinessProbe>,
        time_provider: Arc<dyn TimeProvider>,
        settings: SupervisorSettings,
    ) -> Self {
        let (shutdown_tx, _) = shutdown_channel();
        Self {
            inner: Arc::new(Inner {
                run_id: Uuid::new_v4(),
                launcher,
                probe,
                time_provider,
                settings,
                registry: Mutex::new(Registry::default()),
                shutdown_tx,
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Unique id of this supervisor run (attached to its log records)
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    /// Validate specs and return their start order without launching anything
    pub fn start_order(specs: &[ServiceSpec]) -> Result<Vec<ServiceName>, StartupError> {
        let graph = DependencyGraph::build(specs)?;
        Ok(graph.order().to_vec())
    }

    /// Snapshot of every handle, in launch order
    pub async fn handles(&self) -> Vec<ServiceHandle> {
        self.inner.registry.lock().await.handles()
    }

    /// Snapshot of one handle
    pub async fn handle(&self, name: &str) -> Option<ServiceHandle> {
        self.inner
            .registry
            .lock()
            .await
            .entries
            .get(name)
            .map(|e| e.handle.clone())
    }

    /// Token that resolves once shutdown has been initiated
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.inner.shutdown_tx.token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn now_millis(&self) -> i64 {
        self.inner.time_provider.now_millis()
    }
}
