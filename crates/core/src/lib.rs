// Conductor Core - Domain Logic, Ports & Supervisor
// NO infrastructure dependencies (hexagonal architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{Result, StartupError, SupervisorError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
