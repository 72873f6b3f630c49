// Central Error Types for the Supervisor

use thiserror::Error;

use crate::domain::DomainError;

/// Failure of `Supervisor::start` (one typed result naming the failed service)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Invalid service spec: {0}")]
    InvalidSpec(String),

    #[error("Service '{name}' not ready after {waited_ms}ms")]
    ReadinessTimeout { name: String, waited_ms: u64 },

    #[error("Service '{name}' failed to launch: {cause}")]
    LaunchFailure { name: String, cause: String },

    #[error("Supervisor already started")]
    AlreadyStarted,

    #[error("Startup interrupted by shutdown")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StartupError {
    /// Name of the service that caused the failure, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            StartupError::ReadinessTimeout { name, .. }
            | StartupError::LaunchFailure { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<DomainError> for StartupError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::CyclicDependency { cycle } => StartupError::CyclicDependency { cycle },
            DomainError::InvalidStateTransition { .. } => StartupError::Internal(err.to_string()),
            other => StartupError::InvalidSpec(other.to_string()),
        }
    }
}

/// Supervisor-level error type
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error("Service '{name}' exited unexpectedly ({})", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    UnexpectedExit { name: String, code: Option<i32> },

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Process error: {0}")]
    Process(#[from] crate::port::ProcessError),
}

/// Result type alias using SupervisorError
pub type Result<T> = std::result::Result<T, SupervisorError>;
