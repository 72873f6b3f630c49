// Service Handle Domain Model (runtime record per launched service)

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::service::ServiceName;

/// Service lifecycle state
///
/// PENDING -> STARTING -> READY -> RUNNING -> (STOPPING -> STOPPED) | CRASHED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Pending,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl ServiceState {
    /// STOPPED and CRASHED are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Crashed)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Pending => write!(f, "PENDING"),
            ServiceState::Starting => write!(f, "STARTING"),
            ServiceState::Ready => write!(f, "READY"),
            ServiceState::Running => write!(f, "RUNNING"),
            ServiceState::Stopping => write!(f, "STOPPING"),
            ServiceState::Stopped => write!(f, "STOPPED"),
            ServiceState::Crashed => write!(f, "CRASHED"),
        }
    }
}

/// Mutable runtime record owned by the Supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: ServiceName,
    pub pid: Option<u32>,
    pub state: ServiceState,
    pub started_at: Option<i64>,   // epoch ms
    pub last_seen_at: Option<i64>, // epoch ms, last successful liveness check
    pub stopped_at: Option<i64>,
    pub exit_code: Option<i32>,
}

impl ServiceHandle {
    /// Create a handle in PENDING state (launch about to be attempted)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid: None,
            state: ServiceState::Pending,
            started_at: None,
            last_seen_at: None,
            stopped_at: None,
            exit_code: None,
        }
    }

    fn transition_error(&self, to: ServiceState) -> DomainError {
        DomainError::InvalidStateTransition {
            service: self.name.clone(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// PENDING -> STARTING once the process has been spawned
    pub fn begin_start(&mut self, pid: Option<u32>, now_millis: i64) -> Result<()> {
        if self.state != ServiceState::Pending {
            return Err(self.transition_error(ServiceState::Starting));
        }
        self.state = ServiceState::Starting;
        self.pid = pid;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// STARTING -> READY after the readiness probe succeeded
    pub fn mark_ready(&mut self) -> Result<()> {
        if self.state != ServiceState::Starting {
            return Err(self.transition_error(ServiceState::Ready));
        }
        self.state = ServiceState::Ready;
        Ok(())
    }

    /// READY -> RUNNING on the first successful liveness check
    pub fn mark_running(&mut self, now_millis: i64) -> Result<()> {
        if self.state != ServiceState::Ready {
            return Err(self.transition_error(ServiceState::Running));
        }
        self.state = ServiceState::Running;
        self.last_seen_at = Some(now_millis);
        Ok(())
    }

    /// Record a successful liveness check
    pub fn record_liveness(&mut self, now_millis: i64) {
        self.last_seen_at = Some(now_millis);
    }

    /// Unexpected exit (or failed launch) -> CRASHED
    pub fn mark_crashed(&mut self, exit_code: Option<i32>, now_millis: i64) -> Result<()> {
        match self.state {
            ServiceState::Pending
            | ServiceState::Starting
            | ServiceState::Ready
            | ServiceState::Running => {
                self.state = ServiceState::Crashed;
                self.exit_code = exit_code;
                self.stopped_at = Some(now_millis);
                Ok(())
            }
            _ => Err(self.transition_error(ServiceState::Crashed)),
        }
    }

    /// Any non-terminal state -> STOPPING
    pub fn begin_stop(&mut self) -> Result<()> {
        if self.state.is_terminal() || self.state == ServiceState::Stopping {
            return Err(self.transition_error(ServiceState::Stopping));
        }
        self.state = ServiceState::Stopping;
        Ok(())
    }

    /// STOPPING -> STOPPED once the process is reaped (or abandoned after SIGKILL)
    pub fn mark_stopped(&mut self, exit_code: Option<i32>, now_millis: i64) -> Result<()> {
        if self.state != ServiceState::Stopping {
            return Err(self.transition_error(ServiceState::Stopped));
        }
        self.state = ServiceState::Stopped;
        self.exit_code = exit_code;
        self.stopped_at = Some(now_millis);
        Ok(())
    }
}
