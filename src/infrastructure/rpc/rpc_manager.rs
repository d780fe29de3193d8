//! Weighted endpoint pool with retry, backoff and failover.
//!
//! Every network call in the process goes through `execute_with_retry`,
//! subscriptions through `execute_with_failover`.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::endpoint::{EndpointStatus, RpcEndpoint};
use super::error_class::{ClassifyError, ErrorClass};
use crate::shared::errors::RpcError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout_backoff_step: Duration,
    pub request_timeout: Duration,
    pub rate_limit_cooldown: Duration,
    pub unhealthy_error_rate: f64,
    pub unhealthy_min_requests: u64,
    pub recovery_window: Duration,
    pub rate_limit_reset: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            timeout_backoff_step: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(5),
            unhealthy_error_rate: 0.5,
            unhealthy_min_requests: 10,
            recovery_window: Duration::from_secs(30),
            rate_limit_reset: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, capped
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// `step * attempt`, capped
    pub fn timeout_backoff(&self, attempt: u32) -> Duration {
        self.timeout_backoff_step.saturating_mul(attempt).min(self.max_backoff)
    }
}

/// Adds up to 10% random spread to a backoff delay
fn jittered(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

pub struct RpcManager<C> {
    endpoints: Vec<Arc<RpcEndpoint<C>>>,
    policy: RetryPolicy,
    backoff_until: Mutex<Option<Instant>>,
    last_round_trip_ms: AtomicU64,
}

impl<C> RpcManager<C> {
    /// Endpoints are kept in descending weight order; equal weights keep input order.
    pub fn new(mut endpoints: Vec<RpcEndpoint<C>>, policy: RetryPolicy) -> Result<Self, RpcError> {
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpoints);
        }
        endpoints.sort_by(|a, b| b.weight.cmp(&a.weight));
        info!(
            "🌐 RPC pool: {}",
            endpoints
                .iter()
                .map(|e| format!("{}({})", e.name, e.weight))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            policy,
            backoff_until: Mutex::new(None),
            last_round_trip_ms: AtomicU64::new(0),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn endpoints(&self) -> &[Arc<RpcEndpoint<C>>] {
        &self.endpoints
    }

    /// Latency of the most recent successful call
    pub fn last_round_trip(&self) -> Duration {
        Duration::from_millis(self.last_round_trip_ms.load(Ordering::Relaxed))
    }

    /// Highest-weight endpoint that is healthy and not rate-limited within the
    /// cooldown; the highest-weight endpoint when every one is excluded.
    pub async fn get_connection(&self) -> Arc<RpcEndpoint<C>> {
        for endpoint in &self.endpoints {
            if endpoint.is_selectable(self.policy.rate_limit_cooldown).await {
                return Arc::clone(endpoint);
            }
        }
        debug!("All endpoints excluded, falling back to {}", self.endpoints[0].name);
        Arc::clone(&self.endpoints[0])
    }

    pub async fn status_report(&self) -> Vec<EndpointStatus> {
        let mut report = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            report.push(endpoint.status(self.policy.rate_limit_cooldown).await);
        }
        report
    }

    /// Run `operation` against the selected endpoint until it succeeds, the
    /// ledger rejects it, or the attempt ceiling is reached.
    pub async fn execute_with_retry<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        let mut last_cause = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            self.wait_for_backoff().await;

            let endpoint = self.get_connection().await;
            let started = Instant::now();
            let outcome = tokio::time::timeout(self.policy.request_timeout, operation(endpoint.client())).await;

            let (class, cause) = match outcome {
                Ok(Ok(value)) => {
                    let elapsed = started.elapsed();
                    endpoint.record_success(elapsed).await;
                    self.last_round_trip_ms.store(elapsed.as_millis() as u64, Ordering::Relaxed);
                    if attempt > 1 {
                        debug!("{} succeeded on {} after {} attempts", operation_name, endpoint.name, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => (e.classify(), e.to_string()),
                Err(_) => (
                    ErrorClass::Timeout,
                    format!("timed out after {}ms", self.policy.request_timeout.as_millis()),
                ),
            };
            last_cause = format!("{}: {}", endpoint.name, cause);
            self.record_failure(&endpoint, attempt, class, started.elapsed()).await;

            match class {
                ErrorClass::Ledger => {
                    warn!("{} rejected by ledger via {}: {}", operation_name, endpoint.name, cause);
                    return Err(RpcError::Ledger(cause));
                }
                ErrorClass::Timeout => {
                    let delay = self.policy.timeout_backoff(attempt);
                    warn!(
                        "⌛ {} timed out on {} (attempt {}/{}), retrying in {}ms",
                        operation_name,
                        endpoint.name,
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis()
                    );
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                ErrorClass::RateLimited | ErrorClass::Transport => {
                    warn!(
                        "{} failed on {} (attempt {}/{}): {}",
                        operation_name, endpoint.name, attempt, self.policy.max_attempts, cause
                    );
                }
            }
        }

        error!("❌ {} exhausted {} attempts: {}", operation_name, self.policy.max_attempts, last_cause);
        Err(RpcError::Exhausted {
            operation: operation_name.to_string(),
            attempts: self.policy.max_attempts,
            last_cause,
        })
    }

    /// Run a long-lived `operation` (a subscription) once per endpoint, in
    /// failover order, until one succeeds. Failures count against each
    /// endpoint's health like retried calls; no request timeout is applied.
    pub async fn execute_with_failover<T, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<RpcEndpoint<C>>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        let order = self.failover_order().await;
        let attempts = order.len() as u32;
        let mut last_cause = String::from("no attempt made");

        for (attempt, endpoint) in (1..).zip(order) {
            self.wait_for_backoff().await;

            let started = Instant::now();
            match operation(Arc::clone(&endpoint)).await {
                Ok(value) => {
                    endpoint.record_stream_success().await;
                    if attempt > 1 {
                        debug!("{} succeeded on {} after {} attempts", operation_name, endpoint.name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let class = e.classify();
                    let cause = e.to_string();
                    self.record_failure(&endpoint, attempt, class, started.elapsed()).await;
                    if class == ErrorClass::Ledger {
                        return Err(RpcError::Ledger(cause));
                    }
                    warn!(
                        "{} failed on {} (attempt {}/{}): {}",
                        operation_name, endpoint.name, attempt, attempts, cause
                    );
                    last_cause = format!("{}: {}", endpoint.name, cause);
                }
            }
        }

        Err(RpcError::Exhausted {
            operation: operation_name.to_string(),
            attempts,
            last_cause,
        })
    }

    /// Selectable endpoints by weight, then the excluded ones
    async fn failover_order(&self) -> Vec<Arc<RpcEndpoint<C>>> {
        let mut selectable = Vec::with_capacity(self.endpoints.len());
        let mut excluded = Vec::new();
        for endpoint in &self.endpoints {
            if endpoint.is_selectable(self.policy.rate_limit_cooldown).await {
                selectable.push(Arc::clone(endpoint));
            } else {
                excluded.push(Arc::clone(endpoint));
            }
        }
        selectable.extend(excluded);
        selectable
    }

    /// Account a failed call against `endpoint`; rate limits also open the
    /// shared backoff window.
    async fn record_failure(&self, endpoint: &RpcEndpoint<C>, attempt: u32, class: ErrorClass, elapsed: Duration) {
        match class {
            ErrorClass::Ledger => endpoint.record_success(elapsed).await,
            ErrorClass::RateLimited => {
                endpoint.record_rate_limit().await;
                let delay = jittered(self.policy.rate_limit_backoff(attempt));
                *self.backoff_until.lock().await = Some(Instant::now() + delay);
                warn!("⏳ {} rate limited, backing off {}ms", endpoint.name, delay.as_millis());
            }
            ErrorClass::Timeout => endpoint.record_timeout().await,
            ErrorClass::Transport => {
                let tripped = endpoint
                    .record_error(self.policy.unhealthy_error_rate, self.policy.unhealthy_min_requests)
                    .await;
                if tripped {
                    error!("🚫 Endpoint {} marked unhealthy", endpoint.name);
                }
            }
        }
    }

    /// Honour the shared rate-limit backoff window
    async fn wait_for_backoff(&self) {
        let until = *self.backoff_until.lock().await;
        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                tokio::time::sleep(until - now).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug)]
    pub(crate) enum FakeError {
        RateLimited,
        Timeout,
        Down,
        Rejected,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl ClassifyError for FakeError {
        fn classify(&self) -> ErrorClass {
            match self {
                FakeError::RateLimited => ErrorClass::RateLimited,
                FakeError::Timeout => ErrorClass::Timeout,
                FakeError::Down => ErrorClass::Transport,
                FakeError::Rejected => ErrorClass::Ledger,
            }
        }
    }

    pub(crate) fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            timeout_backoff_step: Duration::from_millis(1),
            request_timeout: Duration::from_millis(200),
            ..RetryPolicy::default()
        }
    }

    /// Endpoints whose client is their own weight
    pub(crate) fn weighted(weights: &[u32], policy: RetryPolicy) -> RpcManager<u32> {
        let endpoints = weights
            .iter()
            .map(|w| RpcEndpoint::new(format!("w{}", w), format!("https://rpc-{}.example", w), *w, *w))
            .collect();
        RpcManager::new(endpoints, policy).unwrap()
    }

    #[tokio::test]
    async fn test_failover_skips_rate_limited_endpoint() {
        let manager = weighted(&[100, 90, 10], fast_policy());
        assert_eq!(manager.get_connection().await.weight, 100);

        manager.endpoints()[0].record_rate_limit().await;
        assert_eq!(manager.get_connection().await.weight, 90);

        manager.endpoints()[1].record_rate_limit().await;
        assert_eq!(manager.get_connection().await.weight, 10);
    }

    #[tokio::test]
    async fn test_endpoints_are_ordered_by_weight() {
        let manager = weighted(&[10, 100, 90], fast_policy());
        let weights: Vec<u32> = manager.endpoints().iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![100, 90, 10]);
    }

    #[tokio::test]
    async fn test_falls_back_to_highest_weight_when_all_excluded() {
        let manager = weighted(&[100, 90, 10], fast_policy());
        for endpoint in manager.endpoints() {
            endpoint.mark_unhealthy().await;
        }
        assert_eq!(manager.get_connection().await.weight, 100);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_on_next_endpoint() {
        let manager = weighted(&[100, 90, 10], fast_policy());
        let calls = AtomicU32::new(0);
        let result = manager
            .execute_with_retry("get_slot", |client: Arc<u32>| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if *client == 100 {
                        Err(FakeError::RateLimited)
                    } else {
                        Ok(*client)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(90));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.endpoints()[0].stats().await.rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_cause() {
        let manager = weighted(&[100], fast_policy());
        let result: Result<(), RpcError> = manager
            .execute_with_retry("get_balance", |_| async { Err::<(), _>(FakeError::Down) })
            .await;
        match result {
            Err(RpcError::Exhausted { operation, attempts, last_cause }) => {
                assert_eq!(operation, "get_balance");
                assert_eq!(attempts, 3);
                assert!(last_cause.contains("Down"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(manager.endpoints()[0].stats().await.error_count, 3);
    }

    #[tokio::test]
    async fn test_ledger_rejection_is_not_retried() {
        let manager = weighted(&[100, 90], fast_policy());
        let calls = AtomicU32::new(0);
        let result: Result<(), RpcError> = manager
            .execute_with_retry("send_transaction", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(FakeError::Rejected) }
            })
            .await;
        assert_eq!(result, Err(RpcError::Ledger("Rejected".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retries_then_succeeds() {
        let manager = weighted(&[100], fast_policy());
        let calls = AtomicU32::new(0);
        let result = manager
            .execute_with_retry("get_slot", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(FakeError::Timeout)
                    } else {
                        Ok(7u64)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        let stats = manager.endpoints()[0].stats().await;
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.request_count, 2);
    }

    #[tokio::test]
    async fn test_hung_call_is_cut_by_request_timeout() {
        let mut policy = fast_policy();
        policy.request_timeout = Duration::from_millis(10);
        policy.max_attempts = 2;
        let manager = weighted(&[100], policy);
        let result: Result<(), RpcError> = manager
            .execute_with_retry("get_slot", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), FakeError>(())
            })
            .await;
        assert!(matches!(result, Err(RpcError::Exhausted { attempts: 2, .. })));
    }

    /// Endpoint names stand in for websocket urls
    async fn subscribe_fails_on_heaviest(endpoint: Arc<RpcEndpoint<u32>>) -> Result<String, FakeError> {
        if endpoint.weight == 100 {
            Err(FakeError::Down)
        } else {
            Ok(endpoint.name.clone())
        }
    }

    #[tokio::test]
    async fn test_failing_subscription_marks_endpoint_and_fails_over() {
        let policy = RetryPolicy {
            unhealthy_min_requests: 1,
            ..fast_policy()
        };
        let manager = weighted(&[100, 90, 10], policy);

        let result = manager.execute_with_failover("signature_subscribe", subscribe_fails_on_heaviest).await;
        assert_eq!(result, Ok("w90".to_string()));

        let failed = manager.endpoints()[0].stats().await;
        assert_eq!(failed.error_count, 1);
        assert!(!failed.healthy);
        let served = manager.endpoints()[1].stats().await;
        assert_eq!(served.request_count, 1);
        assert_eq!(served.avg_latency_ms, 0.0);

        // The tripped endpoint is no longer selected for ordinary calls
        assert_eq!(manager.get_connection().await.weight, 90);
    }

    #[tokio::test]
    async fn test_subscription_exhausts_every_endpoint_once() {
        let manager = weighted(&[100, 90], fast_policy());
        let calls = AtomicU32::new(0);
        let result: Result<(), RpcError> = manager
            .execute_with_failover("signature_subscribe", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(FakeError::Down) }
            })
            .await;
        assert!(matches!(result, Err(RpcError::Exhausted { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        for endpoint in manager.endpoints() {
            assert_eq!(endpoint.stats().await.error_count, 1);
        }
    }

    #[test]
    fn test_backoff_growth() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            timeout_backoff_step: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.rate_limit_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.rate_limit_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.rate_limit_backoff(3), Duration::from_millis(400));
        assert_eq!(policy.rate_limit_backoff(10), Duration::from_millis(1000));
        assert_eq!(policy.timeout_backoff(3), Duration::from_millis(150));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        assert_eq!(jittered(Duration::from_millis(5)), Duration::from_millis(5));
        for _ in 0..50 {
            let delay = jittered(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(1000) && delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = RpcManager::<u32>::new(Vec::new(), RetryPolicy::default());
        assert!(matches!(result, Err(RpcError::NoEndpoints)));
    }
}
