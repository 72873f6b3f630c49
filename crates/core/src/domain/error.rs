// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid state transition for '{service}': {from} -> {to}")]
    InvalidStateTransition {
        service: String,
        from: String,
        to: String,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Duplicate service name: {0}")]
    DuplicateService(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
