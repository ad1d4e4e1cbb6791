//! Bounded retry for transient backend failures.
//!
//! The acquisition loop feeds every read outcome into a [`FailureTracker`].
//! A single timeout means "no data yet". A single communication failure is
//! retried after an exponential backoff capped at
//! [`RetryPolicy::max_backoff`]. Only an unbroken run of failures (or of
//! timeouts) escalates, and the escalated error is session-fatal.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WaveError;

/// Retry and escalation limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Length of a run of communication failures that escalates
    pub max_consecutive_failures: u32,
    /// Length of a run of read timeouts that escalates. Never below 2, so a
    /// lone timeout is always "no data yet".
    pub max_consecutive_timeouts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Growth factor between retries
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            max_consecutive_timeouts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// What the loop should do after a failed read.
#[derive(Debug)]
pub enum RetryDecision {
    /// Nothing arrived yet; continue at the normal cadence.
    NoData,
    /// Sleep for the delay, then read again.
    Retry(Duration),
    /// Give up; the session moves to its error state.
    Escalate(WaveError),
}

/// Counts consecutive failures and timeouts.
#[derive(Debug)]
pub struct FailureTracker {
    policy: RetryPolicy,
    consecutive_failures: u32,
    consecutive_timeouts: u32,
    total_failures: u64,
    total_timeouts: u64,
}

impl FailureTracker {
    /// Create a tracker for `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            consecutive_timeouts: 0,
            total_failures: 0,
            total_timeouts: 0,
        }
    }

    /// A read completed; both runs are broken.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_timeouts = 0;
    }

    /// Classify a failed read.
    pub fn record_error(&mut self, err: WaveError) -> RetryDecision {
        match err {
            WaveError::Timeout { device, timeout_ms } => {
                self.consecutive_timeouts += 1;
                self.total_timeouts += 1;
                if self.consecutive_timeouts >= self.policy.max_consecutive_timeouts.max(2) {
                    return RetryDecision::Escalate(WaveError::communication(
                        device,
                        format!(
                            "{} consecutive read timeouts ({} ms each)",
                            self.consecutive_timeouts, timeout_ms
                        ),
                    ));
                }
                RetryDecision::NoData
            }
            WaveError::DeviceCommunication { .. } => {
                self.consecutive_failures += 1;
                self.total_failures += 1;
                if self.consecutive_failures >= self.policy.max_consecutive_failures {
                    return RetryDecision::Escalate(err);
                }
                let delay = self.policy.backoff_for(self.consecutive_failures);
                warn!(
                    attempt = self.consecutive_failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient read failure, retrying"
                );
                RetryDecision::Retry(delay)
            }
            other => RetryDecision::Escalate(other),
        }
    }

    /// Current run of communication failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current run of timeouts.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Failures seen over the tracker's lifetime.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Timeouts seen over the tracker's lifetime.
    pub fn total_timeouts(&self) -> u64 {
        self.total_timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comm() -> WaveError {
        WaveError::communication("demo", "glitch")
    }

    fn timeout() -> WaveError {
        WaveError::Timeout {
            device: "demo".into(),
            timeout_ms: 50,
        }
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_for(100), Duration::from_millis(500));
    }

    #[test]
    fn test_failures_escalate_after_limit() {
        let mut tracker = FailureTracker::new(RetryPolicy {
            max_consecutive_failures: 3,
            ..Default::default()
        });

        assert!(matches!(tracker.record_error(comm()), RetryDecision::Retry(_)));
        assert!(matches!(tracker.record_error(comm()), RetryDecision::Retry(_)));
        assert!(matches!(
            tracker.record_error(comm()),
            RetryDecision::Escalate(WaveError::DeviceCommunication { .. })
        ));
    }

    #[test]
    fn test_success_resets_run() {
        let mut tracker = FailureTracker::new(RetryPolicy {
            max_consecutive_failures: 2,
            ..Default::default()
        });

        for _ in 0..10 {
            assert!(matches!(tracker.record_error(comm()), RetryDecision::Retry(_)));
            tracker.record_success();
        }
        assert_eq!(tracker.total_failures(), 10);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn test_single_timeout_is_no_data() {
        let mut tracker = FailureTracker::new(RetryPolicy {
            max_consecutive_timeouts: 2,
            ..Default::default()
        });

        assert!(matches!(tracker.record_error(timeout()), RetryDecision::NoData));
        assert!(matches!(tracker.record_error(timeout()), RetryDecision::NoData));
        match tracker.record_error(timeout()) {
            RetryDecision::Escalate(WaveError::DeviceCommunication { message, .. }) => {
                assert!(message.contains("2 consecutive read timeouts"), "{}", message);
            }
            other => panic!("expected escalation, got {:?}", other),
        }
    }

    #[test]
    fn test_limits_count_the_same_way() {
        let policy = RetryPolicy {
            max_consecutive_failures: 3,
            max_consecutive_timeouts: 3,
            ..Default::default()
        };
        let mut failures = FailureTracker::new(policy.clone());
        let mut timeouts = FailureTracker::new(policy);
        for _ in 0..2 {
            assert!(!matches!(failures.record_error(comm()), RetryDecision::Escalate(_)));
            assert!(!matches!(timeouts.record_error(timeout()), RetryDecision::Escalate(_)));
        }
        assert!(matches!(failures.record_error(comm()), RetryDecision::Escalate(_)));
        assert!(matches!(timeouts.record_error(timeout()), RetryDecision::Escalate(_)));
    }

    #[test]
    fn test_lone_timeout_never_escalates() {
        let mut tracker = FailureTracker::new(RetryPolicy {
            max_consecutive_timeouts: 1,
            ..Default::default()
        });
        assert!(matches!(tracker.record_error(timeout()), RetryDecision::NoData));
        assert!(matches!(tracker.record_error(timeout()), RetryDecision::Escalate(_)));
    }

    #[test]
    fn test_fatal_errors_escalate_immediately() {
        let mut tracker = FailureTracker::new(RetryPolicy::default());
        assert!(matches!(
            tracker.record_error(WaveError::BufferOverflow { dropped: 10 }),
            RetryDecision::Escalate(WaveError::BufferOverflow { dropped: 10 })
        ));
    }
}
