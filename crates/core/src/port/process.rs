// Process Launcher Port
// Abstraction over spawning and signalling service processes

use crate::domain::ServiceSpec;
use async_trait::async_trait;
use thiserror::Error;

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, None when terminated by a signal
    pub code: Option<i32>,
    /// Terminating signal number (unix only)
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Log file error: {0}")]
    LogFile(String),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// A process launched for a service, owned by the Supervisor
///
/// The Supervisor only ever signals the exact process it created.
pub trait ManagedProcess: Send + Sync {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Length of the log file when the process was launched
    ///
    /// Log-line readiness checks only look at output past this offset.
    fn log_offset(&self) -> u64;

    /// Non-blocking liveness check: Some(exit) once the process has ended
    fn try_wait(&mut self) -> Result<Option<ProcessExit>, ProcessError>;

    /// Ask the process to exit (SIGTERM)
    fn terminate(&mut self) -> Result<(), ProcessError>;

    /// Force the process to exit (SIGKILL)
    fn force_kill(&mut self) -> Result<(), ProcessError>;
}

/// Process Launcher trait
///
/// Implementations:
/// - TokioProcessLauncher (infra-system): real child processes
/// - MockProcessLauncher: scripted processes for tests
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launch the service's command with output redirected to its log file
    ///
    /// # Errors
    /// - ProcessError::LogFile if the log file cannot be opened
    /// - ProcessError::SpawnFailed if the executable cannot be started
    async fn launch(&self, spec: &ServiceSpec) -> Result<Box<dyn ManagedProcess>, ProcessError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Scripted process behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Runs until terminated
        LongRunning,
        /// Ignores SIGTERM, only SIGKILL stops it
        IgnoresTerminate,
        /// Exits on its own after N liveness checks
        ExitsAfter { polls: usize, code: i32 },
    }

    /// Calls observed by the mock launcher, in order
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProcessCall {
        Launch(String),
        Terminate(String),
        Kill(String),
    }

    type CallLog = Arc<Mutex<Vec<ProcessCall>>>;

    struct MockProcess {
        name: String,
        pid: u32,
        behavior: MockBehavior,
        polls: usize,
        exit: Option<ProcessExit>,
        calls: CallLog,
    }

    impl ManagedProcess for MockProcess {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn log_offset(&self) -> u64 {
            0
        }

        fn try_wait(&mut self) -> Result<Option<ProcessExit>, ProcessError> {
            if self.exit.is_none() {
                if let MockBehavior::ExitsAfter { polls, code } = self.behavior {
                    self.polls += 1;
                    if self.polls > polls {
                        self.exit = Some(ProcessExit::code(code));
                    }
                }
            }
            Ok(self.exit)
        }

        fn terminate(&mut self) -> Result<(), ProcessError> {
            self.calls
                .lock()
                .unwrap()
                .push(ProcessCall::Terminate(self.name.clone()));
            if !matches!(self.behavior, MockBehavior::IgnoresTerminate) && self.exit.is_none() {
                self.exit = Some(ProcessExit::signal(15));
            }
            Ok(())
        }

        fn force_kill(&mut self) -> Result<(), ProcessError> {
            self.calls
                .lock()
                .unwrap()
                .push(ProcessCall::Kill(self.name.clone()));
            if self.exit.is_none() {
                self.exit = Some(ProcessExit::signal(9));
            }
            Ok(())
        }
    }

    /// Mock Process Launcher for testing
    #[derive(Default)]
    pub struct MockProcessLauncher {
        behaviors: Mutex<HashMap<String, MockBehavior>>,
        spawn_failures: Mutex<Vec<String>>,
        calls: CallLog,
        next_pid: Mutex<u32>,
    }

    impl MockProcessLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_behavior(self, name: impl Into<String>, behavior: MockBehavior) -> Self {
            self.behaviors.lock().unwrap().insert(name.into(), behavior);
            self
        }

        pub fn with_spawn_failure(self, name: impl Into<String>) -> Self {
            self.spawn_failures.lock().unwrap().push(name.into());
            self
        }

        pub fn calls(&self) -> Vec<ProcessCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Names of launched services, in launch order
        pub fn launched(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ProcessCall::Launch(name) => Some(name),
                    _ => None,
                })
                .collect()
        }

        pub fn terminated(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ProcessCall::Terminate(name) => Some(name),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ProcessLauncher for MockProcessLauncher {
        async fn launch(
            &self,
            spec: &ServiceSpec,
        ) -> Result<Box<dyn ManagedProcess>, ProcessError> {
            if self.spawn_failures.lock().unwrap().contains(&spec.name) {
                return Err(ProcessError::SpawnFailed(format!(
                    "No such file or directory: {}",
                    spec.command
                )));
            }

            self.calls
                .lock()
                .unwrap()
                .push(ProcessCall::Launch(spec.name.clone()));

            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(&spec.name)
                .cloned()
                .unwrap_or(MockBehavior::LongRunning);

            let pid = {
                let mut next = self.next_pid.lock().unwrap();
                *next += 1;
                1000 + *next
            };

            Ok(Box::new(MockProcess {
                name: spec.name.clone(),
                pid,
                behavior,
                polls: 0,
                exit: None,
                calls: Arc::clone(&self.calls),
            }))
        }
    }
}
