// Supervisor constants (No magic values)
use std::time::Duration;

/// Grace period between SIGTERM and SIGKILL (5 seconds)
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5000;

/// Interval between liveness passes of monitor() (500ms)
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 500;

/// Startup timeout for specs that declare none (60 seconds)
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

/// Default readiness backoff: 250ms doubling up to 5s
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 250;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 5000;

/// Upper bound for a single readiness probe call (2 seconds)
pub const PROBE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// How often stopping processes are polled for exit (100ms)
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for a SIGKILLed process to be reaped (2 seconds)
pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);
