//! Requests-per-minute and tokens-per-minute gate shared by every generation call.
//!
//! The limiter keeps a log of dispatches over the trailing 60 seconds. A caller that would push
//! either ceiling over its limit waits until enough of the log has aged out, plus a small random
//! jitter so callers released together do not hit the provider in lockstep. It never rejects.

use rand::prelude::RngExt;
use rand::rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Dispatch {
    seq: u64,
    at: Instant,
    tokens: u32,
}

#[derive(Debug, Default)]
struct LimiterState {
    dispatched: VecDeque<Dispatch>,
    next_seq: u64,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.dispatched.front() {
            if now.duration_since(front.at) >= WINDOW {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> u32 {
        self.dispatched.iter().map(|d| d.tokens).fold(0u32, u32::saturating_add)
    }
}

/// Proof of admission; hand it back to [`RateLimiter::reconcile`] once real usage is known.
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    seq: u64,
    pub estimated_tokens: u32,
}

/// Requests and tokens dispatched in the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub requests: u32,
    pub tokens: u32,
}

pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    max_jitter: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute.max(1),
            tokens_per_minute: config.tokens_per_minute.max(1),
            max_jitter: config.max_jitter,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// How long until a call estimated at `tokens` fits, or `None` if it fits now.
    ///
    /// An empty window always admits, so a single oversized call cannot block forever.
    fn wait_needed(&self, state: &LimiterState, now: Instant, tokens: u32) -> Option<Duration> {
        let requests = state.dispatched.len() as u32;
        let used = state.tokens();
        let requests_ok = requests < self.requests_per_minute;
        let tokens_ok = state.dispatched.is_empty() || used.saturating_add(tokens) <= self.tokens_per_minute;
        if requests_ok && tokens_ok {
            return None;
        }

        // Release time of the dispatch whose expiry frees enough capacity
        let mut freed_tokens = 0u32;
        for (index, dispatch) in state.dispatched.iter().enumerate() {
            freed_tokens = freed_tokens.saturating_add(dispatch.tokens);
            let remaining = requests - (index as u32 + 1);
            let fits_requests = remaining < self.requests_per_minute;
            let fits_tokens =
                remaining == 0 || used.saturating_sub(freed_tokens).saturating_add(tokens) <= self.tokens_per_minute;
            if fits_requests && fits_tokens {
                return Some((dispatch.at + WINDOW).saturating_duration_since(now));
            }
        }
        Some(WINDOW)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=max_ms))
    }

    /// Wait until a call estimated at `estimated_tokens` fits under both ceilings, then record it.
    ///
    /// The lock is held while waiting, so concurrent callers are admitted strictly one at a time.
    pub async fn acquire(&self, estimated_tokens: u32) -> Permit {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            state.prune(now);

            match self.wait_needed(&state, now, estimated_tokens) {
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.dispatched.push_back(Dispatch {
                        seq,
                        at: now,
                        tokens: estimated_tokens,
                    });
                    return Permit { seq, estimated_tokens };
                }
                Some(wait) => {
                    let wait = wait + self.jitter();
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        requests = state.dispatched.len(),
                        tokens = state.tokens(),
                        "Rate limit reached, delaying call"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Replace the estimate of a dispatched call with the provider-reported usage.
    ///
    /// No-op if the call already aged out of the window.
    pub async fn reconcile(&self, permit: &Permit, actual_tokens: u32) {
        let mut state = self.state.lock().await;
        if let Some(dispatch) = state.dispatched.iter_mut().find(|d| d.seq == permit.seq) {
            dispatch.tokens = actual_tokens;
        }
    }

    pub async fn usage(&self) -> WindowUsage {
        let mut state = self.state.lock().await;
        state.prune(Instant::now());
        WindowUsage {
            requests: state.dispatched.len() as u32,
            tokens: state.tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(rpm: u32, tpm: u32, jitter: Duration) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_minute: rpm,
            tokens_per_minute: tpm,
            max_jitter: jitter,
            expected_completion_tokens: 0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn delays_request_over_ceiling_until_window_frees() {
        let limiter = limiter(25, 1_000_000, Duration::from_millis(250));
        let start = Instant::now();

        for _ in 0..25 {
            limiter.acquire(10).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire(10).await;
        let waited = start.elapsed();
        assert!(waited >= WINDOW, "waited {waited:?}");
        assert!(waited <= WINDOW + Duration::from_millis(250), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn token_ceiling_and_reconciliation() {
        let limiter = limiter(100, 1000, Duration::ZERO);
        let start = Instant::now();

        let first = limiter.acquire(400).await;
        limiter.acquire(400).await;
        assert_eq!(limiter.usage().await, WindowUsage { requests: 2, tokens: 800 });

        // Real usage was much lower, so a third call fits right away
        limiter.reconcile(&first, 100).await;
        limiter.acquire(400).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // 900 used; the next 400 must wait for the first dispatch to age out
        limiter.acquire(400).await;
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_call_admitted_on_empty_window() {
        let limiter = limiter(10, 500, Duration::ZERO);
        let start = Instant::now();
        limiter.acquire(5000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_estimate_behind_earlier_calls_waits_for_window() {
        let limiter = limiter(100, 1000, Duration::ZERO);
        let start = Instant::now();
        limiter.acquire(10).await;
        limiter.acquire(10).await;

        limiter.acquire(u32::MAX).await;
        assert_eq!(start.elapsed(), WINDOW);
        assert_eq!(limiter.usage().await, WindowUsage { requests: 1, tokens: u32::MAX });
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_rolling_ceiling() {
        let limiter = Arc::new(limiter(10, 1_000_000, Duration::from_millis(100)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..35 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(1).await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        for (i, at) in admitted.iter().enumerate() {
            let in_window = admitted[i..].iter().take_while(|t| t.duration_since(*at) < WINDOW).count();
            assert!(in_window <= 10, "{in_window} calls within 60s of call {i}");
        }
        assert!(start.elapsed() >= WINDOW * 3);
    }
}
