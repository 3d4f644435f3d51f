//! Built-in health-checkable services.

use crate::error::ServiceError;
use crate::health::{HealthCheckResult, HealthStatus};
use crate::service::{HealthCheckable, InitContext, Service};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_DEGRADED_AFTER: Duration = Duration::from_millis(500);

/// Reports whether a TCP endpoint accepts connections.
///
/// | outcome                          | status      |
/// |----------------------------------|-------------|
/// | connected within the threshold   | `HEALTHY`   |
/// | connected, but slower            | `DEGRADED`  |
/// | refused, unreachable, timed out  | `UNHEALTHY` |
#[derive(Debug, Clone)]
pub struct TcpProbe {
    name: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
    degraded_after: Duration,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            degraded_after: DEFAULT_DEGRADED_AFTER,
        }
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connections slower than `threshold` are reported as `DEGRADED`.
    pub fn with_degraded_threshold(mut self, threshold: Duration) -> Self {
        self.degraded_after = threshold;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn into_health(self) -> Arc<dyn HealthCheckable> {
        Arc::new(self)
    }
}

impl Service for TcpProbe {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn as_health_checkable(self: Arc<Self>) -> Option<Arc<dyn HealthCheckable>> {
        Some(self)
    }
}

#[async_trait]
impl HealthCheckable for TcpProbe {
    async fn init(&self, ctx: &InitContext) -> Result<(), ServiceError> {
        info!(service = %self.name, address = %self.address(), app = ctx.service_name(), "TCP probe ready");
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthCheckResult, ServiceError> {
        let started = Instant::now();
        let outcome = timeout(self.connect_timeout, TcpStream::connect((self.host.as_str(), self.port))).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(_stream)) if elapsed > self.degraded_after => HealthCheckResult::new(
                &self.name,
                HealthStatus::Degraded,
                format!("connected in {elapsed:?}, above {:?}", self.degraded_after),
            ),
            Ok(Ok(_stream)) => HealthCheckResult::healthy(&self.name),
            Ok(Err(e)) => HealthCheckResult::unhealthy(&self.name, "connection failed").with_detail("error", e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(
                &self.name,
                format!("no connection within {:?}", self.connect_timeout),
            ),
        };
        debug!(service = %self.name, status = %result.status(), ?elapsed, "TCP probe finished");

        Ok(result
            .with_detail("address", self.address())
            .with_detail("latency_ms", elapsed.as_millis() as u64)
            .with_response_time(elapsed))
    }
}
