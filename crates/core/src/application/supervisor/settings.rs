// Supervisor settings (deserializable from the `[supervisor]` config table)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::constants::*;
use crate::domain::{Backoff, ServiceSpec};

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}

fn default_monitor_interval_ms() -> u64 {
    DEFAULT_MONITOR_INTERVAL_MS
}

fn default_startup_timeout_ms() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_MS
}

fn default_backoff() -> Backoff {
    Backoff::Exponential {
        initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
        factor: DEFAULT_BACKOFF_FACTOR,
        max_ms: DEFAULT_BACKOFF_MAX_MS,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    #[serde(default = "default_startup_timeout_ms")]
    pub default_startup_timeout_ms: u64,
    #[serde(default = "default_backoff")]
    pub default_backoff: Backoff,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
            default_startup_timeout_ms: default_startup_timeout_ms(),
            default_backoff: default_backoff(),
        }
    }
}

impl SupervisorSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    /// Spec timeout, or the supervisor default
    pub fn startup_timeout_for(&self, spec: &ServiceSpec) -> Duration {
        spec.startup_timeout()
            .unwrap_or_else(|| Duration::from_millis(self.default_startup_timeout_ms))
    }

    /// Spec backoff, or the supervisor default
    pub fn backoff_for<'a>(&'a self, spec: &'a ServiceSpec) -> &'a Backoff {
        spec.backoff.as_ref().unwrap_or(&self.default_backoff)
    }
}
