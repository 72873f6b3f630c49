// Conductor Infrastructure - System Adapters
// Implements: ProcessLauncher, ReadinessProbe

pub mod process_launcher;
pub mod readiness_probe;

pub use process_launcher::TokioProcessLauncher;
pub use readiness_probe::SystemReadinessProbe;
