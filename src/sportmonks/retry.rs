//! Bounded retry with exponential backoff and shared rate-limit cooldown.
//!
//! Policy for one wrapped call:
//! - 404 ends immediately with `None`.
//! - 429 publishes a cooldown of `rate_limit_step * (n + 1)` (n = rate-limit
//!   responses seen so far) on the shared [`RateLimitGate`] and retries.
//!   These are charged to `max_rate_limit_waits`, not to `max_retries`.
//! - Anything else (timeout, transport, 5xx, empty body) is charged to
//!   `max_retries` and followed by `backoff_base * 2^attempt`, except after
//!   the last attempt.
//! - Running out of either budget yields `None`; callers treat that as
//!   "no data", not as an error.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_rate_limit_waits: u32,
    pub backoff_base: Duration,
    pub rate_limit_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            max_rate_limit_waits: 3,
            backoff_base: Duration::from_secs(1),
            rate_limit_step: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// 1s, 2s, 4s, ... for attempts 0, 1, 2, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    /// 5s, 10s, 15s, ... for the 1st, 2nd, 3rd rate-limit response.
    pub fn rate_limit_delay(&self, index: u32) -> Duration {
        self.rate_limit_step.saturating_mul(index.saturating_add(1))
    }
}

/// Cooldown shared by every request of a run. A 429 seen by one worker
/// holds back all of them until the deadline passes.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the cooldown to at least `now + cooldown`.
    pub fn trip(&self, cooldown: Duration) {
        let deadline = Instant::now() + cooldown;
        let mut until = self.until.lock().unwrap_or_else(|e| e.into_inner());
        if until.map_or(true, |current| current < deadline) {
            *until = Some(deadline);
        }
    }

    /// Remaining cooldown, if any.
    #[cfg(test)]
    pub fn remaining(&self) -> Option<Duration> {
        let until = *self.until.lock().unwrap_or_else(|e| e.into_inner());
        until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Sleep until no cooldown is active. Re-checks after waking in case
    /// another worker extended the deadline meanwhile.
    pub async fn wait_ready(&self) {
        loop {
            let deadline = *self.until.lock().unwrap_or_else(|e| e.into_inner());
            match deadline {
                Some(d) if d > Instant::now() => tokio::time::sleep_until(d).await,
                _ => return,
            }
        }
    }
}

/// Runs outbound calls under a [`RetryPolicy`] and a shared gate.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    gate: Arc<RateLimitGate>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, gate: Arc<RateLimitGate>) -> Self {
        Retrier { policy, gate }
    }

    /// Run `op` until it succeeds or a budget is exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max = self.policy.max_retries;
        let mut attempt = 0u32;
        let mut rate_limit_waits = 0u32;

        while attempt < max {
            self.gate.wait_ready().await;
            match op().await {
                Ok(value) => return Some(value),
                Err(FetchError::NotFound) => {
                    warn!("{}: not found (404), not retrying", label);
                    return None;
                }
                Err(FetchError::RateLimited) => {
                    if rate_limit_waits >= self.policy.max_rate_limit_waits {
                        warn!(
                            "{}: still rate limited after {} cooldowns, giving up",
                            label, rate_limit_waits
                        );
                        return None;
                    }
                    let wait = self.policy.rate_limit_delay(rate_limit_waits);
                    rate_limit_waits += 1;
                    warn!("{}: rate limit hit, cooling down {:?}", label, wait);
                    self.gate.trip(wait);
                }
                Err(e) => {
                    attempt += 1;
                    warn!("{}: {} (attempt {}/{})", label, e, attempt, max);
                    if attempt < max {
                        let delay = self.policy.backoff_delay(attempt - 1);
                        debug!("{}: retrying in {:?}", label, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        None
    }

    /// Single attempt that still honours and feeds the shared cooldown.
    pub async fn once<T, Fut>(&self, fut: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.gate.wait_ready().await;
        let result = fut.await;
        if matches!(result, Err(FetchError::RateLimited)) {
            self.gate.trip(self.policy.rate_limit_delay(0));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32, max_rate_limit_waits: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            max_rate_limit_waits,
            backoff_base: Duration::from_millis(1),
            rate_limit_step: Duration::from_millis(2),
        }
    }

    fn retrier(policy: RetryPolicy) -> Retrier {
        Retrier::new(policy, Arc::new(RateLimitGate::new()))
    }

    /// Replays `script` one response per call, repeating the last entry.
    async fn run_script(
        retrier: &Retrier,
        script: Vec<Result<u32, FetchError>>,
    ) -> (Option<u32>, u32) {
        let calls = AtomicU32::new(0);
        let result = retrier
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
                let response = script[n.min(script.len() - 1)].clone();
                async move { response }
            })
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn test_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_delay(0), Duration::from_secs(5));
        assert_eq!(policy.rate_limit_delay(2), Duration::from_secs(15));
        // Large attempt numbers saturate instead of overflowing.
        assert!(policy.backoff_delay(40) >= Duration::from_secs(u32::MAX as u64));
    }

    #[tokio::test]
    async fn test_timeouts_use_exactly_max_retries_attempts() {
        let (result, calls) = run_script(&retrier(fast_policy(3, 3)), vec![Err(FetchError::Timeout)]).await;
        assert_eq!(result, None);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let (result, calls) =
            run_script(&retrier(fast_policy(5, 5)), vec![Err(FetchError::NotFound), Ok(1)]).await;
        assert_eq!(result, None);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_consume_retry_budget() {
        // A single allowed attempt still succeeds after a 429.
        let (result, calls) =
            run_script(&retrier(fast_policy(1, 3)), vec![Err(FetchError::RateLimited), Ok(7)]).await;
        assert_eq!(result, Some(7));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_budget_is_bounded() {
        let (result, calls) =
            run_script(&retrier(fast_policy(3, 2)), vec![Err(FetchError::RateLimited)]).await;
        assert_eq!(result, None);
        // One initial call plus two cooldown retries.
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let (result, calls) = run_script(
            &retrier(fast_policy(3, 3)),
            vec![Err(FetchError::Status(503)), Err(FetchError::EmptyPayload), Ok(9)],
        )
        .await;
        assert_eq!(result, Some(9));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_trips_shared_gate() {
        let gate = Arc::new(RateLimitGate::new());
        let policy = RetryPolicy {
            rate_limit_step: Duration::from_millis(40),
            ..fast_policy(1, 1)
        };
        let first = Retrier::new(policy.clone(), Arc::clone(&gate));
        let other_worker = Retrier::new(policy, Arc::clone(&gate));

        let result: Result<u32, _> = first.once(async { Err(FetchError::RateLimited) }).await;
        assert_eq!(result, Err(FetchError::RateLimited));
        assert!(gate.remaining().is_some());

        let started = Instant::now();
        let value = other_worker.once(async { Ok::<_, FetchError>(1) }).await;
        assert_eq!(value, Ok(1));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(gate.remaining().is_none());
    }

    #[tokio::test]
    async fn test_gate_trip_never_shortens_cooldown() {
        let gate = RateLimitGate::new();
        gate.trip(Duration::from_secs(60));
        gate.trip(Duration::from_millis(1));
        assert!(gate.remaining().unwrap() > Duration::from_secs(30));
    }
}
