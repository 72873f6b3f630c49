// Domain Layer - Pure service model, lifecycle and dependency graph

pub mod error;
pub mod graph;
pub mod handle;
pub mod service;

// Re-exports
pub use error::DomainError;
pub use graph::DependencyGraph;
pub use handle::{ServiceHandle, ServiceState};
pub use service::{Backoff, EnvVar, LogMode, ReadinessCheck, ServiceName, ServiceSpec};
