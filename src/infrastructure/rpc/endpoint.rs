//! One weighted RPC endpoint and its rolling health statistics

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Smoothing factor for the latency average
const LATENCY_EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Healthy,
    RateLimited,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub rate_limit_hits: u64,
    pub last_rate_limit: Option<Instant>,
    pub last_success: Option<Instant>,
    pub avg_latency_ms: f64,
    pub healthy: bool,
    pub unhealthy_since: Option<Instant>,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            rate_limit_hits: 0,
            last_rate_limit: None,
            last_success: None,
            avg_latency_ms: 0.0,
            healthy: true,
            unhealthy_since: None,
        }
    }
}

impl EndpointStats {
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }

    pub fn rate_limited_within(&self, window: Duration) -> bool {
        self.last_rate_limit.is_some_and(|at| at.elapsed() < window)
    }
}

/// Serializable endpoint view for status logs
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub url: String,
    pub weight: u32,
    pub state: EndpointState,
    pub request_count: u64,
    pub error_count: u64,
    pub rate_limit_hits: u64,
    pub avg_latency_ms: f64,
    pub last_success_ago_ms: Option<u64>,
}

pub struct RpcEndpoint<C> {
    pub name: String,
    pub url: String,
    pub ws_url: Option<String>,
    pub weight: u32,
    client: Arc<C>,
    stats: RwLock<EndpointStats>,
}

impl<C> RpcEndpoint<C> {
    pub fn new(name: impl Into<String>, url: impl Into<String>, weight: u32, client: C) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ws_url: None,
            weight,
            client: Arc::new(client),
            stats: RwLock::new(EndpointStats::default()),
        }
    }

    pub fn with_ws_url(mut self, ws_url: Option<String>) -> Self {
        self.ws_url = ws_url;
        self
    }

    pub fn client(&self) -> Arc<C> {
        Arc::clone(&self.client)
    }

    /// WebSocket url, configured or derived from the HTTP url
    pub fn websocket_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => {
                if let Some(rest) = self.url.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = self.url.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    self.url.clone()
                }
            }
        }
    }

    pub async fn stats(&self) -> EndpointStats {
        self.stats.read().await.clone()
    }

    pub async fn is_selectable(&self, rate_limit_cooldown: Duration) -> bool {
        let stats = self.stats.read().await;
        stats.healthy && !stats.rate_limited_within(rate_limit_cooldown)
    }

    pub async fn record_success(&self, latency: Duration) {
        let mut stats = self.stats.write().await;
        stats.request_count += 1;
        stats.last_success = Some(Instant::now());
        let sample = latency.as_secs_f64() * 1000.0;
        stats.avg_latency_ms = if stats.avg_latency_ms == 0.0 {
            sample
        } else {
            LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * stats.avg_latency_ms
        };
    }

    /// Count a success without a latency sample; long-lived streams have no round trip
    pub async fn record_stream_success(&self) {
        let mut stats = self.stats.write().await;
        stats.request_count += 1;
        stats.last_success = Some(Instant::now());
    }

    pub async fn record_rate_limit(&self) {
        let mut stats = self.stats.write().await;
        stats.request_count += 1;
        stats.rate_limit_hits += 1;
        stats.last_rate_limit = Some(Instant::now());
    }

    pub async fn record_timeout(&self) {
        self.stats.write().await.request_count += 1;
    }

    /// Count an error; returns true when this call flipped the endpoint unhealthy
    pub async fn record_error(&self, max_error_rate: f64, min_requests: u64) -> bool {
        let mut stats = self.stats.write().await;
        stats.request_count += 1;
        stats.error_count += 1;
        if stats.healthy && stats.request_count >= min_requests && stats.error_rate() > max_error_rate {
            stats.healthy = false;
            stats.unhealthy_since = Some(Instant::now());
            return true;
        }
        false
    }

    pub async fn mark_unhealthy(&self) {
        let mut stats = self.stats.write().await;
        stats.healthy = false;
        stats.unhealthy_since = Some(Instant::now());
    }

    /// Restore after a successful probe. Counters restart so the old error
    /// rate cannot immediately trip the endpoint again.
    pub async fn restore(&self) {
        let mut stats = self.stats.write().await;
        stats.healthy = true;
        stats.unhealthy_since = None;
        stats.request_count = 0;
        stats.error_count = 0;
    }

    /// Unhealthy for at least `window`
    pub async fn due_for_probe(&self, window: Duration) -> bool {
        let stats = self.stats.read().await;
        !stats.healthy && stats.unhealthy_since.is_some_and(|at| at.elapsed() >= window)
    }

    /// Clear rate-limit counters after `quiet` without a hit; returns true if cleared
    pub async fn reset_rate_limit_if_quiet(&self, quiet: Duration) -> bool {
        let mut stats = self.stats.write().await;
        match stats.last_rate_limit {
            Some(at) if at.elapsed() >= quiet => {
                stats.rate_limit_hits = 0;
                stats.last_rate_limit = None;
                true
            }
            _ => false,
        }
    }

    pub async fn status(&self, rate_limit_cooldown: Duration) -> EndpointStatus {
        let stats = self.stats.read().await;
        let state = if !stats.healthy {
            EndpointState::Unhealthy
        } else if stats.rate_limited_within(rate_limit_cooldown) {
            EndpointState::RateLimited
        } else {
            EndpointState::Healthy
        };
        EndpointStatus {
            name: self.name.clone(),
            url: self.url.clone(),
            weight: self.weight,
            state,
            request_count: stats.request_count,
            error_count: stats.error_count,
            rate_limit_hits: stats.rate_limit_hits,
            avg_latency_ms: stats.avg_latency_ms,
            last_success_ago_ms: stats.last_success.map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unhealthy_after_error_rate_over_min_requests() {
        let endpoint = RpcEndpoint::new("e", "https://rpc.example", 10, ());
        for _ in 0..4 {
            endpoint.record_success(Duration::from_millis(10)).await;
        }
        // 5 errors of 9 requests: rate above half but under the request floor
        for _ in 0..5 {
            assert!(!endpoint.record_error(0.5, 10).await);
        }
        assert!(endpoint.stats().await.healthy);
        // 6 of 10
        assert!(endpoint.record_error(0.5, 10).await);
        assert!(!endpoint.stats().await.healthy);
        assert!(!endpoint.is_selectable(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_rate_limit_window_and_quiet_reset() {
        let endpoint = RpcEndpoint::new("e", "https://rpc.example", 10, ());
        endpoint.record_rate_limit().await;
        assert!(!endpoint.is_selectable(Duration::from_secs(5)).await);
        assert!(endpoint.is_selectable(Duration::ZERO).await);

        assert!(!endpoint.reset_rate_limit_if_quiet(Duration::from_secs(60)).await);
        assert!(endpoint.reset_rate_limit_if_quiet(Duration::ZERO).await);
        assert_eq!(endpoint.stats().await.rate_limit_hits, 0);
    }

    #[tokio::test]
    async fn test_latency_average() {
        let endpoint = RpcEndpoint::new("e", "https://rpc.example", 10, ());
        endpoint.record_success(Duration::from_millis(100)).await;
        endpoint.record_success(Duration::from_millis(200)).await;
        let avg = endpoint.stats().await.avg_latency_ms;
        assert!((avg - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_websocket_url_derivation() {
        let endpoint = RpcEndpoint::new("e", "https://rpc.example/key", 10, ());
        assert_eq!(endpoint.websocket_url(), "wss://rpc.example/key");
        let endpoint = endpoint.with_ws_url(Some("wss://ws.example".to_string()));
        assert_eq!(endpoint.websocket_url(), "wss://ws.example");
    }
}
