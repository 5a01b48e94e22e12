//! Per-topic circuit breaker.
//!
//! A topic whose generations fail `failure_threshold` times in a row is opened and skipped by the
//! worker. Once `recovery_timeout` has passed the circuit goes half-open and lets trial generations
//! through: `success_threshold` successes close it again, a single failure reopens it.
//!
//! Each batch owns its own breaker, so the state here is plain data driven by the worker.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::types::{CircuitBreakerSummary, HalfOpenCircuit, OpenCircuit, TopicFailures};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    failures: u32,
    successes: u32,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopicCircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,
    circuits: BTreeMap<String, Circuit>,
}

impl TopicCircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
            success_threshold: config.success_threshold.max(1),
            circuits: BTreeMap::new(),
        }
    }

    /// Whether `topic` should be skipped at `now`.
    ///
    /// An open circuit whose recovery timeout has passed moves to half-open and is let through.
    pub fn is_open(&mut self, topic: &str, now: Instant) -> bool {
        let Some(circuit) = self.circuits.get_mut(topic) else {
            return false;
        };
        match circuit.state {
            CircuitState::Open { opened_at } if now.duration_since(opened_at) >= self.recovery_timeout => {
                info!(topic, "Circuit half-open, testing recovery");
                circuit.state = CircuitState::HalfOpen;
                circuit.successes = 0;
                false
            }
            CircuitState::Open { .. } => true,
            CircuitState::Closed | CircuitState::HalfOpen => false,
        }
    }

    pub fn record_success(&mut self, topic: &str) {
        let circuit = self.circuits.entry(topic.to_string()).or_default();
        circuit.failures = 0;
        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.successes = circuit.successes.saturating_add(1);
                if circuit.successes >= self.success_threshold {
                    info!(topic, "Circuit closed, topic recovered");
                    circuit.state = CircuitState::Closed;
                }
            }
            CircuitState::Open { .. } => {
                circuit.state = CircuitState::Closed;
            }
            CircuitState::Closed => {}
        }
    }

    /// Count a failure against `topic`. Returns true if this failure opened the circuit.
    pub fn record_failure(&mut self, topic: &str, now: Instant) -> bool {
        let circuit = self.circuits.entry(topic.to_string()).or_default();
        circuit.failures = circuit.failures.saturating_add(1);
        circuit.successes = 0;

        let opens = match circuit.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.failures >= self.failure_threshold,
            CircuitState::Open { .. } => false,
        };
        if opens {
            warn!(
                topic,
                failures = circuit.failures,
                recovery_secs = self.recovery_timeout.as_secs(),
                "Circuit opened, skipping topic"
            );
            circuit.state = CircuitState::Open { opened_at: now };
        }
        opens
    }

    /// Time until the earliest open circuit may be tried again, or `None` if none is open.
    pub fn time_until_recovery(&self, now: Instant) -> Option<Duration> {
        self.circuits
            .values()
            .filter_map(|circuit| match circuit.state {
                CircuitState::Open { opened_at } => {
                    Some((opened_at + self.recovery_timeout).saturating_duration_since(now))
                }
                _ => None,
            })
            .min()
    }

    pub fn summary(&self, now: Instant) -> CircuitBreakerSummary {
        let mut summary = CircuitBreakerSummary::default();
        for (topic, circuit) in &self.circuits {
            match circuit.state {
                CircuitState::Open { opened_at } => summary.open_circuits.push(OpenCircuit {
                    topic: topic.clone(),
                    failures: circuit.failures,
                    opened_for_seconds: now.duration_since(opened_at).as_secs(),
                }),
                CircuitState::HalfOpen => summary.half_open_circuits.push(HalfOpenCircuit {
                    topic: topic.clone(),
                    successes: circuit.successes,
                }),
                CircuitState::Closed if circuit.failures > 0 => summary.closed_with_failures.push(TopicFailures {
                    topic: topic.clone(),
                    failures: circuit.failures,
                }),
                CircuitState::Closed => {}
            }
        }
        summary
    }
}
