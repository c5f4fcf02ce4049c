//! Request pacing for outbound model calls.
//!
//! Tracks a rolling one-minute request window and a consecutive-failure
//! counter, and wraps arbitrary async work with delays computed from a
//! configurable backoff strategy. The limiter never retries on its own:
//! failures are recorded for bookkeeping and re-raised so the caller
//! decides retry policy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Length of the rolling request-count window.
const WINDOW_SECS: u64 = 60;

/// Backoff strategy applied when computing delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    /// Always the base delay.
    Constant,
    /// `base * multiplier^failures`, capped at the maximum delay.
    Exponential,
    /// Exponential with the failure exponent capped at 3, bounding
    /// worst-case delay growth while still backing off.
    #[default]
    Adaptive,
}

/// Rate limiter settings, loaded from the `[rate_limit]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per rolling one-minute window.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Base delay applied when pacing kicks in.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any computed delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for the exponential strategies.
    #[serde(default = "default_exponential_multiplier")]
    pub exponential_multiplier: f64,

    /// Random offset added to every delay to avoid thundering herds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Delay calculation strategy.
    #[serde(default)]
    pub strategy: RateLimitStrategy,

    /// Whether a fallback path may be tried after repeated failures.
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Delay before the fallback path is attempted.
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_delay_ms: u64,

    /// Process items in chunks instead of strictly one by one.
    #[serde(default = "default_true")]
    pub enable_batching: bool,

    /// Items per chunk when batching is enabled.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Pause between chunks (not after the last).
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_multiplier: default_exponential_multiplier(),
            jitter_ms: default_jitter_ms(),
            strategy: RateLimitStrategy::default(),
            enable_fallback: true,
            fallback_delay_ms: default_fallback_delay_ms(),
            enable_batching: true,
            max_batch_size: default_max_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_exponential_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    100
}

fn default_fallback_delay_ms() -> u64 {
    5000
}

fn default_max_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

/// Paces outbound calls against a per-minute budget with backoff.
pub struct RateLimiter {
    config: RateLimitConfig,
    window_start: Instant,
    request_count: u32,
    #[allow(dead_code)] // Bookkeeping for status inspection
    last_request_time: Option<Instant>,
    consecutive_failures: u32,
    current_delay_ms: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            "Rate limiter initialized: {} requests/minute, strategy {:?}",
            config.requests_per_minute, config.strategy
        );
        Self {
            current_delay_ms: config.base_delay_ms,
            config,
            window_start: Instant::now(),
            request_count: 0,
            last_request_time: None,
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The delay currently in effect, for callers that sleep before a
    /// manual retry.
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }

    fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.request_count = 0;
    }

    /// Whether the next request must be delayed. The window resets
    /// automatically once it is more than a minute old.
    fn should_rate_limit(&mut self) -> bool {
        if self.window_start.elapsed() >= Duration::from_secs(WINDOW_SECS) {
            self.reset_window();
            return false;
        }
        self.request_count >= self.config.requests_per_minute
    }

    /// Compute the delay for the configured strategy, with jitter.
    fn calculate_delay(&self) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;

        let delay_ms = if self.consecutive_failures == 0 {
            base
        } else {
            match self.config.strategy {
                RateLimitStrategy::Constant => base,
                RateLimitStrategy::Exponential => {
                    let exponent = self.consecutive_failures;
                    (base * self.config.exponential_multiplier.powi(exponent as i32)).min(max)
                }
                RateLimitStrategy::Adaptive => {
                    let exponent = self.consecutive_failures.min(3);
                    (base * self.config.exponential_multiplier.powi(exponent as i32)).min(max)
                }
            }
        };

        let jitter = if self.config.jitter_ms > 0 {
            let j = self.config.jitter_ms as i64;
            rand::thread_rng().gen_range(-j..=j)
        } else {
            0
        };

        Duration::from_millis((delay_ms as i64 + jitter).max(0) as u64)
    }

    /// Sleep if the window budget is spent, then reset the window. Only
    /// the calling task suspends; other work in the process proceeds.
    pub async fn wait_if_needed(&mut self) {
        if self.should_rate_limit() {
            let delay = self.calculate_delay();
            warn!(
                "Rate limit reached ({}/{} requests). Waiting {:.2}s...",
                self.request_count,
                self.config.requests_per_minute,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            self.reset_window();
        }
    }

    /// Count a request against the current window.
    pub fn record_request(&mut self) {
        if self.window_start.elapsed() >= Duration::from_secs(WINDOW_SECS) {
            self.reset_window();
        }
        self.request_count += 1;
        self.last_request_time = Some(Instant::now());
        debug!(
            "Request recorded: {}/{} in window",
            self.request_count, self.config.requests_per_minute
        );
    }

    /// Reset failure bookkeeping after a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay_ms = self.config.base_delay_ms;
    }

    /// Record a failed call. Rate-limit errors double the current delay
    /// (capped); other errors recompute it via the strategy.
    pub fn record_failure(&mut self, error: &str) {
        self.consecutive_failures += 1;

        if is_rate_limit_error(error) {
            warn!("Rate limit error detected: {}", error);
            self.current_delay_ms = (self.current_delay_ms * 2).min(self.config.max_delay_ms);
        } else {
            self.current_delay_ms = self.calculate_delay().as_millis() as u64;
        }
    }

    /// Run one unit of work with pacing: wait if the window is spent,
    /// invoke, then record the outcome. Errors are re-raised untouched.
    pub async fn execute<F, Fut, T, E>(&mut self, func: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.wait_if_needed().await;

        match func().await {
            Ok(result) => {
                self.record_request();
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure(&e.to_string());
                Err(e)
            }
        }
    }

    /// Run a unit of work per item, pacing each call. With batching
    /// enabled, items are processed in chunks of `max_batch_size` with
    /// `batch_delay_ms` between chunks (not after the last). Returns one
    /// result per item so the caller decides per-item fallback policy.
    pub async fn execute_batch<I, F, Fut, T, E>(
        &mut self,
        items: Vec<I>,
        mut func: F,
    ) -> Vec<Result<T, E>>
    where
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);

        if !self.config.enable_batching {
            for item in items {
                let result = self.execute(|| func(item)).await;
                results.push(result);
            }
            return results;
        }

        let batch_size = self.config.max_batch_size.max(1);

        for (index, item) in items.into_iter().enumerate() {
            let result = self.execute(|| func(item)).await;
            results.push(result);

            let end_of_batch = (index + 1) % batch_size == 0;
            let last_item = index + 1 == total;
            if end_of_batch && !last_item {
                let delay = Duration::from_millis(self.config.batch_delay_ms);
                info!(
                    "Batch completed. Waiting {:.2}s before next batch...",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }

        results
    }
}

/// Whether an error message indicates the provider rejected the call
/// for rate-limiting reasons.
pub fn is_rate_limit_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("rate_limit") || lower.contains("429") || lower.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: 5,
            base_delay_ms: 1000,
            jitter_ms: 0,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_rate_limit_error_detection() {
        assert!(is_rate_limit_error("HTTP 429 from provider"));
        assert!(is_rate_limit_error("rate_limit exceeded"));
        assert!(is_rate_limit_error("Too Many Requests"));
        assert!(!is_rate_limit_error("connection refused"));
    }

    #[test]
    fn test_constant_strategy_always_base_delay() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            strategy: RateLimitStrategy::Constant,
            ..quiet_config()
        });
        limiter.consecutive_failures = 4;
        assert_eq!(limiter.calculate_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_exponential_strategy_grows_and_caps() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            strategy: RateLimitStrategy::Exponential,
            max_delay_ms: 10_000,
            ..quiet_config()
        });

        limiter.consecutive_failures = 2;
        assert_eq!(limiter.calculate_delay(), Duration::from_millis(4000));

        limiter.consecutive_failures = 10;
        assert_eq!(limiter.calculate_delay(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_adaptive_strategy_caps_the_exponent() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            strategy: RateLimitStrategy::Adaptive,
            ..quiet_config()
        });

        limiter.consecutive_failures = 10;
        // Exponent capped at 3: 1000 * 2^3.
        assert_eq!(limiter.calculate_delay(), Duration::from_millis(8000));
    }

    #[test]
    fn test_rate_limit_failure_doubles_current_delay() {
        let mut limiter = RateLimiter::new(quiet_config());

        limiter.record_failure("429 too many requests");
        assert_eq!(limiter.current_delay(), Duration::from_millis(2000));
        limiter.record_failure("429 too many requests");
        assert_eq!(limiter.current_delay(), Duration::from_millis(4000));

        limiter.record_success();
        assert_eq!(limiter.current_delay(), Duration::from_millis(1000));
        assert_eq!(limiter.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_fills_then_resets_after_a_minute() {
        let mut limiter = RateLimiter::new(quiet_config());

        for _ in 0..5 {
            limiter.record_request();
        }
        assert!(limiter.should_rate_limit());

        let before = Instant::now();
        limiter.wait_if_needed().await;
        // The paused clock advances exactly by the sleep.
        assert!(before.elapsed() >= Duration::from_millis(1000));
        assert_eq!(limiter.request_count, 0);

        // A stale window resets without sleeping.
        for _ in 0..5 {
            limiter.record_request();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        let before = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_records_outcomes() {
        let mut limiter = RateLimiter::new(quiet_config());

        let ok: Result<u32, String> = limiter.execute(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(limiter.request_count, 1);

        let err: Result<u32, String> =
            limiter.execute(|| async { Err("boom".to_string()) }).await;
        assert_eq!(err.unwrap_err(), "boom");
        assert_eq!(limiter.consecutive_failures, 1);
        // Failures do not count against the window budget.
        assert_eq!(limiter.request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_sleeps_between_chunks_but_not_after_last() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 100,
            max_batch_size: 2,
            batch_delay_ms: 2000,
            ..quiet_config()
        });

        let start = Instant::now();
        let results: Vec<Result<u32, String>> = limiter
            .execute_batch(vec![1, 2, 3, 4, 5], |n| async move { Ok(n * 10) })
            .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
        // Five items in chunks of two: two inter-chunk pauses, none
        // after the trailing chunk.
        assert_eq!(start.elapsed(), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_disabled_processes_sequentially() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 100,
            enable_batching: false,
            batch_delay_ms: 2000,
            ..quiet_config()
        });

        let start = Instant::now();
        let results: Vec<Result<u32, String>> = limiter
            .execute_batch(vec![1, 2, 3], |n| async move { Ok(n) })
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
