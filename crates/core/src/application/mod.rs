// Application Layer - Supervisor use cases

pub mod backoff;
pub mod supervisor;

// Re-exports
pub use backoff::ReadinessSchedule;
pub use supervisor::{
    shutdown_channel, LivenessEvent, ShutdownReason, ShutdownReport, ShutdownSender,
    ShutdownToken, Supervisor, SupervisorSettings,
};
