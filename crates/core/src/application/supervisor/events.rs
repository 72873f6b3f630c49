// Supervisor events and shutdown bookkeeping

use serde::Serialize;

use crate::domain::ServiceName;
use crate::error::SupervisorError;

/// Emitted by `Supervisor::monitor()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LivenessEvent {
    /// A RUNNING service's process disappeared (handle is already CRASHED)
    Exited {
        name: ServiceName,
        exit_code: Option<i32>,
    },
    /// A dependent was stopped because `upstream` crashed
    DependentStopped {
        name: ServiceName,
        upstream: ServiceName,
    },
}

impl LivenessEvent {
    pub fn name(&self) -> &str {
        match self {
            LivenessEvent::Exited { name, .. } | LivenessEvent::DependentStopped { name, .. } => {
                name
            }
        }
    }

    /// The error this event represents, for callers that treat crashes as fatal
    pub fn into_error(self) -> Option<SupervisorError> {
        match self {
            LivenessEvent::Exited { name, exit_code } => Some(SupervisorError::UnexpectedExit {
                name,
                code: exit_code,
            }),
            LivenessEvent::DependentStopped { .. } => None,
        }
    }
}

/// Why services are being stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Interrupt/termination signal received (signal name)
    Signal(String),
    /// Caller asked for shutdown
    Requested,
    /// Rollback after `start()` failed on this service
    StartupFailure(ServiceName),
    /// Upstream dependency crashed
    DependencyFailed(ServiceName),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Signal(sig) => write!(f, "signal {}", sig),
            ShutdownReason::Requested => write!(f, "requested"),
            ShutdownReason::StartupFailure(name) => write!(f, "startup failure of {}", name),
            ShutdownReason::DependencyFailed(name) => write!(f, "dependency {} failed", name),
        }
    }
}

/// Outcome of a stop pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Services moved to STOPPED, in the order they stopped
    pub stopped: Vec<ServiceName>,
    /// Services that ignored SIGTERM for the grace period
    pub force_killed: Vec<ServiceName>,
    /// True when shutdown had already run and this call did nothing
    pub already_shut_down: bool,
}
