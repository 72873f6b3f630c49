// Readiness Probe Port
// reason: async-trait (probes do network/file IO)
use async_trait::async_trait;

use crate::domain::ServiceSpec;

/// Per-launch facts a probe may need beyond the spec
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeContext {
    pub pid: Option<u32>,
    /// Log file length at launch (log-line checks skip older output)
    pub log_offset: u64,
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    NotReady(String),
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }
}

/// Readiness probe port
///
/// Replaces fixed sleeps: the supervisor polls this until the service
/// reports ready or its startup timeout elapses.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Evaluate the spec's readiness check once
    ///
    /// # Example
    /// ```text
    /// if probe.check(&spec, &ctx).await.is_ready() {
    ///     handle.mark_ready()?;
    /// }
    /// ```
    async fn check(&self, spec: &ServiceSpec, ctx: &ProbeContext) -> ProbeOutcome;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock probe behavior per service
    #[derive(Debug, Clone, Copy)]
    pub enum ProbeBehavior {
        /// Ready after N failed attempts
        ReadyAfter(usize),
        /// Never ready
        Never,
    }

    /// Mock ReadinessProbe for testing (services without a behavior are ready at once)
    #[derive(Default)]
    pub struct MockReadinessProbe {
        behaviors: Mutex<HashMap<String, ProbeBehavior>>,
        attempts: Mutex<HashMap<String, usize>>,
    }

    impl MockReadinessProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_behavior(self, name: impl Into<String>, behavior: ProbeBehavior) -> Self {
            self.behaviors.lock().unwrap().insert(name.into(), behavior);
            self
        }

        pub fn attempts(&self, name: &str) -> usize {
            self.attempts
                .lock()
                .unwrap()
                .get(name)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ReadinessProbe for MockReadinessProbe {
        async fn check(&self, spec: &ServiceSpec, _ctx: &ProbeContext) -> ProbeOutcome {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(spec.name.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let behavior = self.behaviors.lock().unwrap().get(&spec.name).copied();
            match behavior {
                None => ProbeOutcome::Ready,
                Some(ProbeBehavior::ReadyAfter(n)) if attempt > n => ProbeOutcome::Ready,
                Some(ProbeBehavior::ReadyAfter(_)) => {
                    ProbeOutcome::NotReady(format!("attempt {}", attempt))
                }
                Some(ProbeBehavior::Never) => ProbeOutcome::NotReady("mock never ready".into()),
            }
        }
    }
}
