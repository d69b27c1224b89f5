//! Price lookups with bounded, jittered exponential backoff.

use crate::{Metrics, PriceProvider, ProviderError};
use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry schedule for price lookups.
///
/// The delay after the `n`th failure is `initial * multiplier^(n-1)`, scaled by a random
/// factor within `1 ± jitter` and then capped at `max_delay`. Retrying stops at whichever
/// limit is hit first: `max_attempts` calls in total, or a next delay that would end
/// beyond `max_total` since the first call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Relative jitter, `0.25` for ±25%.
    pub jitter: f64,
    /// Maximum number of calls, the first one included.
    pub max_attempts: u32,
    /// Wall-clock budget for all calls and delays.
    pub max_total: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            multiplier: 1.3,
            max_delay: Duration::from_secs(120),
            jitter: 0.25,
            max_attempts: 200,
            max_total: Duration::from_secs(30 * 60),
        }
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff { policy: self, started: Instant::now(), next_base: self.initial, delays: 0 }
    }
}

/// Delays produced by a [`RetryPolicy`] for one lookup.
#[derive(Debug)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    started: Instant,
    next_base: Duration,
    delays: u32,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        // One delay separates each pair of attempts.
        if self.delays.saturating_add(1) >= self.policy.max_attempts {
            return None;
        }

        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 { rand::rng().random_range(-jitter..=jitter) } else { 0.0 };
        let delay = self.next_base.mul_f64(1.0 + factor).min(self.policy.max_delay);

        if self.started.elapsed() + delay > self.policy.max_total {
            return None;
        }

        self.delays += 1;
        self.next_base = self.next_base.mul_f64(self.policy.multiplier).min(self.policy.max_delay);
        Some(delay)
    }
}

/// The lookup failed on every attempt the policy allowed.
#[derive(Debug, Error)]
#[error("price lookup failed after {attempts} attempts in {elapsed:?}: {source}")]
pub struct PriceError {
    /// Number of calls made.
    pub attempts: u32,
    /// Time spent from the first call until giving up.
    pub elapsed: Duration,
    /// Error returned by the last call.
    #[source]
    pub source: ProviderError,
}

/// Wraps a [`PriceProvider`] with a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryingPriceFetcher<P> {
    provider: Arc<P>,
    policy: RetryPolicy,
}

impl<P> Clone for RetryingPriceFetcher<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), policy: self.policy }
    }
}

impl<P: PriceProvider> RetryingPriceFetcher<P> {
    /// Creates a new [`RetryingPriceFetcher`].
    pub const fn new(provider: Arc<P>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Returns the policy in use.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Looks up the price at `timestamp`, retrying every failure until the policy gives up.
    pub async fn fetch(&self, timestamp: u64) -> Result<f64, PriceError> {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let (provider, counter) = (&self.provider, &attempts);

        let result = (|| async move {
            counter.fetch_add(1, Ordering::Relaxed);
            provider.price_at(timestamp).await
        })
        .retry(self.policy)
        .sleep(tokio::time::sleep)
        .notify(|err: &ProviderError, next_delay: Duration| {
            Metrics::record_price_failure(true);
            warn!(
                target: "price",
                %err,
                timestamp,
                attempt = counter.load(Ordering::Relaxed),
                ?next_delay,
                "Price lookup failed, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(price) => {
                debug!(target: "price", timestamp, price, attempts, "Fetched price");
                Ok(price)
            }
            Err(source) => {
                // The final attempt is not passed to `notify`.
                Metrics::record_price_failure(false);
                let elapsed = started.elapsed();
                warn!(
                    target: "price",
                    err = %source,
                    timestamp,
                    attempts,
                    ?elapsed,
                    "Price lookup failed, giving up"
                );
                Err(PriceError { attempts, elapsed, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{provider::MockPriceProvider, test_utils::CountingRecorder};
    use rstest::rstest;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 6,
            max_total: Duration::from_secs(3600),
        }
    }

    fn failing_provider(calls: usize) -> MockPriceProvider {
        let mut provider = MockPriceProvider::new();
        provider
            .expect_price_at()
            .times(calls)
            .returning(|_| Err(ProviderError::Transport("connection refused".to_string())));
        provider
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let delays: Vec<_> = quick_policy().build().collect();
        let secs: Vec<_> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10]);
    }

    #[rstest]
    #[case::single(1, 0)]
    #[case::pair(2, 1)]
    #[case::many(200, 199)]
    fn test_delays_stop_before_attempt_ceiling(#[case] max_attempts: u32, #[case] delays: usize) {
        let policy = RetryPolicy { max_attempts, max_total: Duration::MAX, ..quick_policy() };
        assert_eq!(policy.build().count(), delays);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(100),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1000),
            jitter: 0.25,
            max_attempts: 500,
            max_total: Duration::MAX,
        };
        for delay in policy.build() {
            assert!(delay >= Duration::from_secs(75), "{delay:?}");
            assert!(delay <= Duration::from_secs(125), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let mut provider = MockPriceProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_price_at()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ProviderError::InvalidResponse("empty".to_string())));
        provider.expect_price_at().times(1).in_sequence(&mut seq).returning(|ts| {
            assert_eq!(ts, 1_588_000_000);
            Ok(3.5)
        });

        let fetcher = RetryingPriceFetcher::new(Arc::new(provider), quick_policy());
        assert_eq!(fetcher.fetch(1_588_000_000).await.unwrap(), 3.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempt_ceiling() {
        let fetcher = RetryingPriceFetcher::new(Arc::new(failing_provider(6)), quick_policy());
        let started = Instant::now();

        let err = fetcher.fetch(0).await.unwrap_err();

        assert_eq!(err.attempts, 6);
        assert!(matches!(err.source, ProviderError::Transport(_)));
        // 1 + 2 + 4 + 8 + 10 seconds of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    #[test]
    fn test_every_failed_attempt_is_reported() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let fetcher = RetryingPriceFetcher::new(Arc::new(failing_provider(6)), quick_policy());
        let recorder = CountingRecorder::default();

        let err = metrics::with_local_recorder(&recorder, || runtime.block_on(fetcher.fetch(0)))
            .unwrap_err();

        assert_eq!(err.attempts, 6);
        assert_eq!(recorder.get(Metrics::PRICE_LOOKUP_FAILURES_TOTAL), 6);
        assert_eq!(recorder.get(Metrics::PRICE_RETRIES_TOTAL), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_time_budget() {
        let policy = RetryPolicy { max_total: Duration::from_secs(7), ..quick_policy() };
        // Delays of 1, 2 and 4 seconds end exactly at the budget. The 8 second one would not fit.
        let fetcher = RetryingPriceFetcher::new(Arc::new(failing_provider(4)), policy);
        let started = Instant::now();

        let err = fetcher.fetch(0).await.unwrap_err();

        assert_eq!(err.attempts, 4);
        assert!(started.elapsed() <= policy.max_total);
    }
}
