//! Model fallback policy: what to do after a classified provider failure.

use crate::config::FallbackConfig;
use crate::provider::ErrorKind;
use crate::types::SwitchReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Try the same model again
    Retry,
    /// Move to the next model in the fallback order
    SwitchTo { model: String, reason: SwitchReason },
    /// Give up on the batch
    Abort { reason: String },
}

/// Fixed fallback order plus the thresholds that drive it.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    models: Vec<String>,
    consecutive_failure_threshold: u32,
    max_switches: u32,
}

impl FallbackPolicy {
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            models: config.models.clone(),
            consecutive_failure_threshold: config.consecutive_failure_threshold,
            max_switches: config.max_switches,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// The entry after `current`. Never wraps; `None` for the last entry or an unknown model.
    pub fn next_model(&self, current: &str) -> Option<&str> {
        let position = self.models.iter().position(|m| m == current)?;
        self.models.get(position + 1).map(String::as_str)
    }

    /// Decide the next action. `consecutive_failures` already includes the failure being handled.
    ///
    /// Rules apply in order: fatal aborts; unavailable and rate-limited models switch; transient
    /// failures retry until the threshold, then switch. Any switch past `max_switches` or past the
    /// end of the list aborts instead.
    pub fn decide(&self, kind: ErrorKind, consecutive_failures: u32, switch_count: u32, current_model: &str) -> Decision {
        let reason = match kind {
            ErrorKind::Fatal => {
                return Decision::Abort {
                    reason: "fatal provider error".to_string(),
                };
            }
            ErrorKind::ModelUnavailable => SwitchReason::ModelUnavailable,
            ErrorKind::RateLimited => SwitchReason::RateLimited,
            ErrorKind::Transient if consecutive_failures < self.consecutive_failure_threshold => return Decision::Retry,
            ErrorKind::Transient => SwitchReason::ConsecutiveFailures,
        };

        if switch_count >= self.max_switches {
            return Decision::Abort {
                reason: "max switches exceeded".to_string(),
            };
        }

        match self.next_model(current_model) {
            Some(next) => Decision::SwitchTo {
                model: next.to_string(),
                reason,
            },
            None => Decision::Abort {
                reason: format!("{reason} on {current_model} with no fallback model left"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FallbackPolicy {
        FallbackPolicy::new(&FallbackConfig {
            models: vec!["a".into(), "b".into(), "c".into()],
            consecutive_failure_threshold: 5,
            max_switches: 5,
        })
    }

    fn switch(model: &str, reason: SwitchReason) -> Decision {
        Decision::SwitchTo {
            model: model.to_string(),
            reason,
        }
    }

    #[test]
    fn fatal_aborts_even_with_fallbacks_left() {
        assert!(matches!(policy().decide(ErrorKind::Fatal, 1, 0, "a"), Decision::Abort { .. }));
    }

    #[test]
    fn unavailable_and_rate_limited_switch_immediately() {
        let policy = policy();
        assert_eq!(
            policy.decide(ErrorKind::ModelUnavailable, 1, 0, "a"),
            switch("b", SwitchReason::ModelUnavailable)
        );
        assert_eq!(policy.decide(ErrorKind::RateLimited, 1, 1, "b"), switch("c", SwitchReason::RateLimited));
    }

    #[test]
    fn transient_retries_until_threshold() {
        let policy = policy();
        for failures in 1..5 {
            assert_eq!(policy.decide(ErrorKind::Transient, failures, 0, "a"), Decision::Retry);
        }
        assert_eq!(
            policy.decide(ErrorKind::Transient, 5, 0, "a"),
            switch("b", SwitchReason::ConsecutiveFailures)
        );
    }

    #[test]
    fn last_model_aborts_instead_of_wrapping() {
        let policy = policy();
        assert_eq!(policy.next_model("c"), None);
        assert!(matches!(policy.decide(ErrorKind::RateLimited, 1, 2, "c"), Decision::Abort { .. }));
        // Retries still happen on the last model
        assert_eq!(policy.decide(ErrorKind::Transient, 2, 2, "c"), Decision::Retry);
    }

    #[test]
    fn max_switches_aborts_sixth_switch() {
        let policy = FallbackPolicy::new(&FallbackConfig {
            models: (0..10).map(|i| format!("m{i}")).collect(),
            consecutive_failure_threshold: 5,
            max_switches: 5,
        });

        assert!(matches!(policy.decide(ErrorKind::RateLimited, 1, 4, "m4"), Decision::SwitchTo { .. }));
        assert_eq!(
            policy.decide(ErrorKind::RateLimited, 1, 5, "m5"),
            Decision::Abort {
                reason: "max switches exceeded".to_string()
            }
        );
    }

    #[test]
    fn unknown_current_model_has_no_next() {
        assert!(matches!(policy().decide(ErrorKind::ModelUnavailable, 1, 0, "zzz"), Decision::Abort { .. }));
    }
}
