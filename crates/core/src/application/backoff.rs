// Readiness polling schedule (bounded backoff up to the startup timeout)
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::Backoff;

/// Delay schedule for one service's readiness polling
///
/// Determines how long to wait between probe attempts based on:
/// - The configured backoff (fixed or exponential)
/// - A deterministic per-service jitter
/// - The time left before the startup timeout
pub struct ReadinessSchedule {
    service: String,
    backoff: Backoff,
    jitter_factor: f64,
    started: Instant,
    timeout: Duration,
    attempt: u32,
}

impl ReadinessSchedule {
    /// Create a schedule that starts counting now
    ///
    /// # Example
    /// ```text
    /// let mut schedule = ReadinessSchedule::new("rasa", backoff, Duration::from_secs(60));
    /// while let Some(delay) = schedule.next_delay() {
    ///     tokio::time::sleep(delay).await;
    /// }
    /// ```
    pub fn new(service: impl Into<String>, backoff: Backoff, timeout: Duration) -> Self {
        let service = service.into();

        // ±10% jitter, fixed per service name
        let jitter_seed = service.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = match backoff {
            Backoff::Fixed { .. } => 1.0,
            Backoff::Exponential { .. } => 0.9 + ((jitter_seed % 21) as f64 / 100.0),
        };

        Self {
            service,
            backoff,
            jitter_factor,
            started: Instant::now(),
            timeout,
            attempt: 0,
        }
    }

    /// Time spent since the schedule started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the startup timeout
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Delay before the next probe attempt
    ///
    /// Returns None once the timeout has elapsed. The delay never runs past
    /// the deadline, so the last attempt happens right at the timeout.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return None;
        }

        let base = self.backoff.base_delay(self.attempt);
        let jittered = base.mul_f64(self.jitter_factor);
        let delay = jittered.min(remaining);
        self.attempt = self.attempt.saturating_add(1);

        debug!(
            service = %self.service,
            attempt = %self.attempt,
            delay_ms = %delay.as_millis(),
            "Scheduling readiness probe"
        );

        Some(delay)
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_schedule_has_no_jitter() {
        let mut schedule = ReadinessSchedule::new(
            "actions",
            Backoff::Fixed { interval_ms: 50 },
            Duration::from_secs(10),
        );

        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_millis(50)));
        assert_eq!(schedule.attempts(), 2);
    }

    #[tokio::test]
    async fn test_exponential_jitter_within_ten_percent() {
        let mut schedule = ReadinessSchedule::new(
            "rasa",
            Backoff::Exponential {
                initial_ms: 1000,
                factor: 2.0,
                max_ms: 10_000,
            },
            Duration::from_secs(60),
        );

        let first = schedule.next_delay().unwrap();
        assert!(first >= Duration::from_millis(900) && first <= Duration::from_millis(1100));

        let second = schedule.next_delay().unwrap();
        assert!(second >= Duration::from_millis(1800) && second <= Duration::from_millis(2200));
    }

    #[tokio::test]
    async fn test_delay_clipped_to_deadline() {
        let mut schedule = ReadinessSchedule::new(
            "webhook",
            Backoff::Fixed { interval_ms: 10_000 },
            Duration::from_millis(200),
        );

        let delay = schedule.next_delay().unwrap();
        assert!(delay <= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_expired_schedule_yields_none() {
        let mut schedule = ReadinessSchedule::new(
            "ngrok",
            Backoff::Fixed { interval_ms: 10 },
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(schedule.is_expired());
        assert_eq!(schedule.next_delay(), None);
    }
}
