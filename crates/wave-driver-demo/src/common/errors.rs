//! Error injection framework for the demo backend.
//!
//! Lets tests drive the acquisition controller through transient glitches,
//! timeouts and permanent communication loss without hardware.

use super::rng::DemoRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wave_core::{WaveError, WaveResult};

/// Error injection configuration
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), "*" for all operations
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<DemoRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted failure pattern.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail every call
    FailAfterN {
        /// Operation name ("open", "start", "read", ...)
        operation: &'static str,
        /// Successful calls before failures begin
        count: u32,
    },
    /// Fail the next `count` calls, then recover
    FailTimes {
        /// Operation name
        operation: &'static str,
        /// Number of failing calls
        count: u32,
    },
    /// Every call times out
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Reported timeout
        timeout_ms: u64,
    },
    /// First call of any operation loses the link; every later call fails
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Per-operation call counters
    operation_counts: HashMap<&'static str, u32>,
    /// Whether communication is lost
    communication_lost: bool,
}

impl ErrorConfig {
    /// No injected errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Multiple scenarios, checked in order
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Custom per-operation failure rates
    pub fn with_rates(rates: HashMap<&'static str, f64>, seed: Option<u64>) -> Self {
        Self::build(rates, Vec::new(), seed)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(DemoRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check if an operation should fail and return the error to report.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> WaveResult<()> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(WaveError::communication(device, "Communication lost"));
        }

        let call = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && call > *count => {
                    return Err(WaveError::communication(
                        device,
                        format!("Injected failure after {} operations", count),
                    ));
                }
                ErrorScenario::FailTimes {
                    operation: op,
                    count,
                } if *op == operation && call <= *count => {
                    return Err(WaveError::communication(
                        device,
                        format!("Injected transient failure {}/{}", call, count),
                    ));
                }
                ErrorScenario::Timeout {
                    operation: op,
                    timeout_ms,
                } if *op == operation => {
                    return Err(WaveError::Timeout {
                        device: device.to_string(),
                        timeout_ms: *timeout_ms,
                    });
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(WaveError::communication(device, "Communication lost"));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(WaveError::communication(
                device,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Clear counters and restore communication
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("demo", "read").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("demo", "read").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "read",
            count: 5,
        });

        for i in 0..5 {
            assert!(
                config.check_operation("demo", "read").is_ok(),
                "Operation {} should succeed",
                i + 1
            );
        }
        assert!(config.check_operation("demo", "read").is_err());
        assert!(config.check_operation("demo", "read").is_err());
        // Other operations unaffected
        assert!(config.check_operation("demo", "start").is_ok());
    }

    #[test]
    fn test_fail_times_recovers() {
        let config = ErrorConfig::scenario(ErrorScenario::FailTimes {
            operation: "read",
            count: 2,
        });

        let err = config.check_operation("demo", "read").unwrap_err();
        assert!(err.is_transient());
        assert!(config.check_operation("demo", "read").is_err());
        assert!(config.check_operation("demo", "read").is_ok());
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "read",
            timeout_ms: 250,
        });
        assert!(matches!(
            config.check_operation("demo", "read"),
            Err(WaveError::Timeout {
                timeout_ms: 250,
                ..
            })
        ));
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        assert!(config.check_operation("demo", "read").is_err());
        assert!(config.check_operation("demo", "start").is_err());

        config.reset();
        // The scenario triggers again on the next call after a reset
        assert!(config.check_operation("demo", "read").is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let config = ErrorConfig::scenario(ErrorScenario::FailTimes {
            operation: "read",
            count: 1,
        });
        let clone = config.clone();
        assert!(config.check_operation("demo", "read").is_err());
        assert!(clone.check_operation("demo", "read").is_ok());
    }
}
