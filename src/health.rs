//! # Health Monitoring
//!
//! The [`HealthManager`] keeps a registry of [`HealthCheckable`] services and
//! runs their probes.
//!
//! ## Fan-out and isolation
//!
//! [`HealthManager::check_all`] spawns every probe as its own Tokio task,
//! each wrapped in a timeout. A probe that errors, times out or panics is
//! recorded as [`HealthStatus::Unknown`] with the reason in `details`; it
//! never aborts the sibling checks and never escalates into an error.
//!
//! ## Aggregation
//!
//! The overall status is the worst individual status, ranked
//! `UNHEALTHY > DEGRADED > UNKNOWN > HEALTHY`. An empty registry is
//! `HEALTHY`.

use crate::error::{ManagerError, RegistryError};
use crate::registry::ManagedServices;
use crate::service::{HealthCheckable, InitContext};
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Rank used for worst-case reduction; higher is worse.
    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Outcome of one probe.
///
/// Fields are set through the constructors and the `with_*` builders only;
/// once a result leaves its probe it is read through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    service_name: String,
    status: HealthStatus,
    message: String,
    details: BTreeMap<String, Value>,
    checked_at: SystemTime,
    response_time: Option<Duration>,
}

impl HealthCheckResult {
    pub fn new(service_name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: SystemTime::now(),
            response_time: None,
        }
    }

    pub fn healthy(service_name: impl Into<String>) -> Self {
        Self::new(service_name, HealthStatus::Healthy, "Service is healthy")
    }

    pub fn degraded(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service_name, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service_name, HealthStatus::Unhealthy, message)
    }

    pub fn unknown(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service_name, HealthStatus::Unknown, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = Some(response_time);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn checked_at(&self) -> SystemTime {
        self.checked_at
    }

    pub fn response_time(&self) -> Option<Duration> {
        self.response_time
    }
}

/// Per-service results plus their worst-case reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateHealthStatus {
    pub overall: HealthStatus,
    pub services: BTreeMap<String, HealthCheckResult>,
}

impl AggregateHealthStatus {
    pub fn from_results(results: impl IntoIterator<Item = (String, HealthCheckResult)>) -> Self {
        let services: BTreeMap<_, _> = results.into_iter().collect();
        let overall = services
            .values()
            .map(HealthCheckResult::status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);
        Self { overall, services }
    }

    pub fn count(&self, status: HealthStatus) -> usize {
        self.services.values().filter(|r| r.status() == status).count()
    }
}

/// Answer of [`HealthManager::check_health`].
#[derive(Debug, Clone, PartialEq)]
pub enum HealthReport {
    Service(HealthCheckResult),
    Aggregate(AggregateHealthStatus),
}

impl HealthReport {
    pub fn overall(&self) -> HealthStatus {
        match self {
            HealthReport::Service(result) => result.status(),
            HealthReport::Aggregate(aggregate) => aggregate.overall,
        }
    }
}

pub struct HealthManager {
    services: ManagedServices<dyn HealthCheckable>,
    check_timeout: Duration,
    last_report: Mutex<Option<AggregateHealthStatus>>,
}

impl Default for HealthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthManager {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CHECK_TIMEOUT)
    }

    pub fn with_timeout(check_timeout: Duration) -> Self {
        Self {
            services: ManagedServices::new(ManagerKind::Health),
            check_timeout,
            last_report: Mutex::new(None),
        }
    }

    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    pub fn state(&self) -> ManagerState {
        self.services.state()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.services.snapshot()
    }

    pub fn register(&mut self, service: Arc<dyn HealthCheckable>) -> Result<(), RegistryError> {
        self.services.register(service)
    }

    pub fn unregister(&mut self, service_name: &str) -> Result<Arc<dyn HealthCheckable>, RegistryError> {
        self.services.unregister(service_name)
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<dyn HealthCheckable>> {
        self.services.get(service_name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.names()
    }

    /// Calls `init` on every service in registration order.
    pub async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError> {
        self.services.init(ctx).await
    }

    /// Calls `clean` on every initialized service in reverse order.
    pub async fn clean(&mut self) -> Result<(), ManagerError> {
        self.services.clean().await
    }

    pub(crate) async fn abort(&mut self) -> Result<(), ManagerError> {
        self.services.abort().await
    }

    /// One service when `service_name` is given, otherwise all of them.
    pub async fn check_health(&self, service_name: Option<&str>) -> Result<HealthReport, RegistryError> {
        match service_name {
            Some(name) => self.check_service(name).await.map(HealthReport::Service),
            None => Ok(HealthReport::Aggregate(self.check_all().await)),
        }
    }

    pub async fn check_service(&self, service_name: &str) -> Result<HealthCheckResult, RegistryError> {
        let service = self.get(service_name).ok_or_else(|| RegistryError::ServiceNotFound {
            manager: Some(ManagerKind::Health),
            service: service_name.to_string(),
        })?;
        let handle = tokio::spawn(probe(service, self.check_timeout));
        Ok(settle(service_name, handle).await)
    }

    /// Runs every probe concurrently and reduces the results.
    pub async fn check_all(&self) -> AggregateHealthStatus {
        debug!(count = self.services.len(), "Starting health checks");

        let handles: Vec<_> = self
            .services
            .iter()
            .map(|service| {
                let name = service.service_name().to_string();
                (name, tokio::spawn(probe(service.clone(), self.check_timeout)))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = settle(&name, handle).await;
            results.push((name, result));
        }

        let aggregate = AggregateHealthStatus::from_results(results);
        info!(
            overall = %aggregate.overall,
            healthy = aggregate.count(HealthStatus::Healthy),
            total = aggregate.services.len(),
            "Health check summary"
        );

        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(aggregate.clone());
        aggregate
    }

    /// Result of the most recent [`check_all`](Self::check_all), if any.
    pub fn last_report(&self) -> Option<AggregateHealthStatus> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn probe(service: Arc<dyn HealthCheckable>, limit: Duration) -> HealthCheckResult {
    let name = service.service_name().to_string();
    let started = Instant::now();
    match timeout(limit, service.health_check()).await {
        Ok(Ok(result)) => {
            debug!(service = %name, status = %result.status(), "Health check completed");
            result
        }
        Ok(Err(e)) => {
            warn!(service = %name, error = %e, "Health check failed");
            HealthCheckResult::unknown(&name, "Health check failed")
                .with_detail("error", e.to_string())
                .with_response_time(started.elapsed())
        }
        Err(_) => {
            warn!(service = %name, timeout_ms = limit.as_millis() as u64, "Health check timed out");
            HealthCheckResult::unknown(&name, "Health check timed out")
                .with_detail("error", format!("no response within {}ms", limit.as_millis()))
                .with_response_time(started.elapsed())
        }
    }
}

async fn settle(name: &str, handle: tokio::task::JoinHandle<HealthCheckResult>) -> HealthCheckResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            warn!(service = name, error = %e, "Health check task aborted");
            HealthCheckResult::unknown(name, "Health check aborted").with_detail("error", e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Hook, MockService};

    #[test]
    fn test_worst_case_ordering() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Unknown), Unknown);
        assert_eq!(Unknown.worst(Degraded), Degraded);
        assert_eq!(Degraded.worst(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.worst(Healthy), Unhealthy);
    }

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let manager = HealthManager::new();
        let report = manager.check_health(None).await.unwrap();
        assert_eq!(report.overall(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_unhealthy_dominates() {
        let mut manager = HealthManager::new();
        manager
            .register(MockService::new("db").with_health(HealthStatus::Healthy).into_health())
            .unwrap();
        manager
            .register(MockService::new("cache").with_health(HealthStatus::Degraded).into_health())
            .unwrap();
        manager
            .register(MockService::new("queue").with_health(HealthStatus::Unhealthy).into_health())
            .unwrap();

        let aggregate = manager.check_all().await;
        assert_eq!(aggregate.overall, HealthStatus::Unhealthy);
        assert_eq!(aggregate.services.len(), 3);
        assert_eq!(manager.last_report(), Some(aggregate));
    }

    #[tokio::test]
    async fn test_unknown_ranks_between_healthy_and_degraded() {
        let mut manager = HealthManager::new();
        manager
            .register(MockService::new("a").with_health(HealthStatus::Healthy).into_health())
            .unwrap();
        manager
            .register(MockService::new("b").with_health(HealthStatus::Unknown).into_health())
            .unwrap();
        assert_eq!(manager.check_all().await.overall, HealthStatus::Unknown);

        manager
            .register(MockService::new("c").with_health(HealthStatus::Degraded).into_health())
            .unwrap();
        assert_eq!(manager.check_all().await.overall, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_failing_and_slow_probes_are_isolated() {
        let mut manager = HealthManager::with_timeout(Duration::from_millis(50));
        manager
            .register(MockService::new("ok").with_health(HealthStatus::Healthy).into_health())
            .unwrap();
        manager
            .register(MockService::new("broken").failing_health_check().into_health())
            .unwrap();
        manager
            .register(
                MockService::new("slow")
                    .with_health(HealthStatus::Healthy)
                    .with_check_delay(Duration::from_secs(5))
                    .into_health(),
            )
            .unwrap();

        let aggregate = manager.check_all().await;
        assert_eq!(aggregate.services["ok"].status(), HealthStatus::Healthy);
        assert_eq!(aggregate.services["broken"].status(), HealthStatus::Unknown);
        assert!(aggregate.services["broken"].detail("error").is_some());
        assert_eq!(aggregate.services["slow"].status(), HealthStatus::Unknown);
        assert_eq!(aggregate.services["slow"].message(), "Health check timed out");
        assert_eq!(aggregate.overall, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_panicking_check_is_unknown() {
        let mut manager = HealthManager::new();
        manager
            .register(MockService::new("ok").with_health(HealthStatus::Healthy).into_health())
            .unwrap();
        manager
            .register(
                MockService::new("crashy")
                    .with_health(HealthStatus::Healthy)
                    .panic_on(Hook::Check)
                    .into_health(),
            )
            .unwrap();

        let aggregate = manager.check_all().await;
        let crashy = &aggregate.services["crashy"];
        assert_eq!(crashy.status(), HealthStatus::Unknown);
        assert_eq!(crashy.message(), "Health check aborted");
        assert!(crashy.detail("error").is_some());
        assert_eq!(aggregate.services["ok"].status(), HealthStatus::Healthy);
        assert_eq!(aggregate.overall, HealthStatus::Unknown);

        // a single-service check takes the same path
        let single = manager.check_service("crashy").await.unwrap();
        assert_eq!(single.status(), HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_single_service_check() {
        let mut manager = HealthManager::new();
        manager
            .register(MockService::new("db").with_health(HealthStatus::Degraded).into_health())
            .unwrap();

        let report = manager.check_health(Some("db")).await.unwrap();
        assert!(matches!(report, HealthReport::Service(ref r) if r.service_name() == "db"));
        assert_eq!(report.overall(), HealthStatus::Degraded);

        let missing = manager.check_health(Some("nope")).await;
        assert!(matches!(missing, Err(RegistryError::ServiceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut manager = HealthManager::new();
        manager.register(MockService::new("db").into_health()).unwrap();
        let err = manager.register(MockService::new("db").into_health()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateService {
                manager: ManagerKind::Health,
                service: "db".into()
            }
        );
        assert_eq!(manager.service_names(), vec!["db".to_string()]);
    }
}
