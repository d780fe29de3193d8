//! Background recovery of unhealthy endpoints

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::rpc_manager::RpcManager;

impl<C> RpcManager<C> {
    /// Probe every endpoint that has been unhealthy for the recovery window
    /// and restore the ones that answer. Returns the number restored.
    pub async fn probe_unhealthy<F, Fut>(&self, probe: F) -> usize
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut restored = 0;
        for endpoint in self.endpoints() {
            if !endpoint.due_for_probe(self.policy().recovery_window).await {
                continue;
            }
            let answered = tokio::time::timeout(self.policy().request_timeout, probe(endpoint.client()))
                .await
                .unwrap_or(false);
            if answered {
                endpoint.restore().await;
                info!("💚 Endpoint {} recovered", endpoint.name);
                restored += 1;
            } else {
                debug!("Endpoint {} still unhealthy", endpoint.name);
            }
        }
        restored
    }

    /// Clear rate-limit counters on endpoints quiet for the reset window
    pub async fn reset_quiet_rate_limits(&self) -> usize {
        let mut reset = 0;
        for endpoint in self.endpoints() {
            if endpoint.reset_rate_limit_if_quiet(self.policy().rate_limit_reset).await {
                debug!("Rate-limit counters reset for {}", endpoint.name);
                reset += 1;
            }
        }
        reset
    }
}

/// Run probe and reset on a fixed interval until the handle is aborted
pub fn spawn_health_prober<C, F, Fut>(manager: Arc<RpcManager<C>>, interval: Duration, probe: F) -> JoinHandle<()>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            manager.probe_unhealthy(&probe).await;
            manager.reset_quiet_rate_limits().await;
        }
    })
}
