// Port Layer - Interfaces for external dependencies

pub mod process;
pub mod readiness;
pub mod time_provider;

// Re-exports
pub use process::{ManagedProcess, ProcessError, ProcessExit, ProcessLauncher};
pub use readiness::{ProbeContext, ProbeOutcome, ReadinessProbe};
pub use time_provider::TimeProvider;
