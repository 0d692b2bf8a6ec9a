use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observable circuit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — all calls pass through.
    Closed,
    /// Breaker tripped — calls are rejected.
    Open,
    /// Cooldown elapsed — one probe call allowed.
    HalfOpen,
}

/// Internal phase with its bookkeeping: the failure run only matters while
/// closed, the trip instant only while open.
enum Phase {
    Closed { failures: u32 },
    Open { tripped_at: Instant },
    HalfOpen,
}

/// Circuit breaker guarding the LLM provider: a run of consecutive
/// failures opens it, submissions then fail fast instead of burning every
/// worker's deadline, and a successful probe after the cooldown closes it
/// again.
///
/// All state lives behind one std mutex that is never held across await
/// points.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, cooldown_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            cooldown: Duration::from_secs(cooldown_seconds),
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    /// Whether a call may proceed. While open, the first check after the
    /// cooldown flips to half-open and lets one probe through.
    pub fn allow(&self) -> bool {
        let mut phase = self.phase.lock().expect("circuit breaker lock poisoned");

        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen => true,
            Phase::Open { tripped_at } => {
                if tripped_at.elapsed() < self.cooldown {
                    return false;
                }
                *phase = Phase::HalfOpen;
                tracing::info!(
                    circuit = %self.name,
                    "Circuit breaker cooldown over, allowing a probe call"
                );
                true
            }
        }
    }

    /// A call succeeded: clear the failure run and close the circuit.
    pub fn record_success(&self) {
        let mut phase = self.phase.lock().expect("circuit breaker lock poisoned");

        if !matches!(*phase, Phase::Closed { .. }) {
            tracing::info!(circuit = %self.name, "Circuit breaker closing after success");
            metrics::counter!("circuit_breaker.recoveries", "circuit" => self.name.clone())
                .increment(1);
        }

        *phase = Phase::Closed { failures: 0 };
    }

    /// A call failed: extend or start a failure run, tripping the circuit
    /// at the threshold. A failed half-open probe reopens immediately.
    pub fn record_failure(&self) {
        let mut phase = self.phase.lock().expect("circuit breaker lock poisoned");

        *phase = match *phase {
            Phase::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    self.trip(failures);
                    Phase::Open {
                        tripped_at: Instant::now(),
                    }
                } else {
                    Phase::Closed { failures }
                }
            }
            // The probe failed: back to open, cooldown restarts.
            Phase::HalfOpen => {
                self.trip(self.failure_threshold);
                Phase::Open {
                    tripped_at: Instant::now(),
                }
            }
            // Already open; keep the most recent failure as the trip time.
            Phase::Open { .. } => Phase::Open {
                tripped_at: Instant::now(),
            },
        };
    }

    pub fn current_state(&self) -> CircuitState {
        match *self.phase.lock().expect("circuit breaker lock poisoned") {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Emit the state gauge (0 closed, 0.5 half-open, 1 open).
    pub fn report_metrics(&self) {
        let state_value = match self.current_state() {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        };
        metrics::gauge!("circuit_breaker.state", "circuit" => self.name.clone()).set(state_value);
    }

    fn trip(&self, failures: u32) {
        tracing::warn!(
            circuit = %self.name,
            failures,
            threshold = self.failure_threshold,
            "Circuit breaker OPEN"
        );
        metrics::counter!("circuit_breaker.trips", "circuit" => self.name.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("llm", 3, 60);
        assert!(breaker.allow());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failure_run() {
        let breaker = CircuitBreaker::new("llm", 3, 60);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_after_cooldown() {
        let breaker = CircuitBreaker::new("llm", 1, 0);
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // Zero cooldown: the next allow() is the probe.
        assert!(breaker.allow());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new("llm", 2, 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        assert!(breaker.allow());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        // One failed probe is enough to re-trip; no fresh run required.
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }
}
