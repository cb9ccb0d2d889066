//! Store health probing and the background monitor.
//!
//! The monitor task owns the only `watch::Sender`; request paths hold receivers
//! and read the latest status without locking.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lessondb_core::config::HealthCheckConfig;

use crate::backend::VectorBackend;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn health_channel() -> (watch::Sender<HealthStatus>, watch::Receiver<HealthStatus>) {
    watch::channel(HealthStatus::Healthy)
}

/// One heartbeat bounded by `timeout`.
pub async fn probe(backend: &dyn VectorBackend, timeout: Duration) -> HealthReport {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, backend.heartbeat()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("heartbeat timed out after {}ms", timeout.as_millis())),
    };
    HealthReport {
        ok: outcome.is_none(),
        latency_ms: started.elapsed().as_millis() as u64,
        error: outcome,
    }
}

/// Probe with up to `retries` attempts and backoff between them.
pub async fn check_with_retries(
    backend: &dyn VectorBackend,
    config: &HealthCheckConfig,
    retry: &RetryPolicy,
) -> HealthReport {
    let attempts = config.retries.max(1);
    let mut report = probe(backend, config.timeout()).await;
    for attempt in 1..attempts {
        if report.ok {
            break;
        }
        tokio::time::sleep(retry.delay_for(attempt)).await;
        report = probe(backend, config.timeout()).await;
    }
    report
}

/// Periodic health loop. Aborted on `shutdown()` or drop.
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(
        backend: Arc<dyn VectorBackend>,
        config: HealthCheckConfig,
        retry: RetryPolicy,
        status: watch::Sender<HealthStatus>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = check_with_retries(backend.as_ref(), &config, &retry).await;
                let next = if report.ok { HealthStatus::Healthy } else { HealthStatus::Degraded };
                let previous = status.send_replace(next);
                match (previous, next) {
                    (HealthStatus::Healthy, HealthStatus::Degraded) => warn!(
                        backend = backend.name(),
                        retries = config.retries,
                        error = report.error.as_deref().unwrap_or(""),
                        "Vector store degraded"
                    ),
                    (HealthStatus::Degraded, HealthStatus::Healthy) => info!(
                        backend = backend.name(),
                        latency_ms = report.latency_ms,
                        "Vector store recovered"
                    ),
                    _ => {}
                }
            }
        });
        Self { handle }
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
