//! Subcommand implementations

mod plan;
mod up;

pub use plan::plan;
pub use up::up;
