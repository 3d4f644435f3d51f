//! # Test Doubles
//!
//! In-memory services and application handle for exercising managers without
//! any real exporter or web framework.
//!
//! - [`MockService`]: a configurable service. Pick its capabilities, make any
//!   hook fail, stall or panic, and record every call in a shared [`CallLog`].
//! - [`MockApp`]: a served application that records attached
//!   instrumentation and `serve` calls.
//!
//! ```rust
//! use applaunch::mock::{context, CallLog, Hook, MockService};
//! use applaunch::tracer::TracerManager;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let log = CallLog::new();
//! let mut tracers = TracerManager::new();
//! tracers.register(MockService::new("ok").with_log(&log).into_tracer()).unwrap();
//! tracers.register(MockService::new("bad").with_log(&log).fail_on(Hook::Arm).into_tracer()).unwrap();
//!
//! let (ctx, _app) = context();
//! assert!(tracers.init(&ctx).await.is_err());
//! assert_eq!(log.entries(), vec!["arm:ok", "arm:bad", "disarm:ok"]);
//! # }
//! ```

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::health::{HealthCheckResult, HealthStatus};
use crate::service::{
    AppHandle, HealthCheckable, InitContext, MetricsService, Service, ServedApp, TracerService,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Hooks a [`MockService`] can be told to fail or delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    Clean,
    Check,
    Arm,
    Disarm,
    Enable,
    Disable,
}

impl Hook {
    fn label(&self) -> &'static str {
        match self {
            Hook::Init => "init",
            Hook::Clean => "clean",
            Hook::Check => "check",
            Hook::Arm => "arm",
            Hook::Disarm => "disarm",
            Hook::Enable => "enable",
            Hook::Disable => "disable",
        }
    }
}

/// Ordered record of hook calls, shared between services.
///
/// Entries look like `"arm:jaeger"`. Health probes are not recorded since
/// they run concurrently.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("mock {hook} failure in '{service}'")]
pub struct MockFailure {
    pub service: String,
    pub hook: &'static str,
}

/// Configurable service for tests.
pub struct MockService {
    name: String,
    log: CallLog,
    health: Option<HealthStatus>,
    tracing: bool,
    metrics: bool,
    failing: HashSet<Hook>,
    panicking: HashSet<Hook>,
    delays: Vec<(Hook, Duration)>,
    armed_on: Mutex<Option<AppHandle>>,
}

impl MockService {
    /// A service with no capabilities yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: CallLog::new(),
            health: None,
            tracing: false,
            metrics: false,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delays: Vec::new(),
            armed_on: Mutex::new(None),
        }
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    /// Declares the health-check capability, reporting `status`.
    pub fn with_health(mut self, status: HealthStatus) -> Self {
        self.health = Some(status);
        self
    }

    pub fn tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    pub fn metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    pub fn fail_on(mut self, hook: Hook) -> Self {
        self.failing.insert(hook);
        self
    }

    /// Makes `hook` panic instead of returning.
    pub fn panic_on(mut self, hook: Hook) -> Self {
        self.panicking.insert(hook);
        self
    }

    pub fn failing_health_check(self) -> Self {
        let this = if self.health.is_none() {
            self.with_health(HealthStatus::Healthy)
        } else {
            self
        };
        this.fail_on(Hook::Check)
    }

    pub fn delay_on(mut self, hook: Hook, delay: Duration) -> Self {
        self.delays.push((hook, delay));
        self
    }

    pub fn with_check_delay(self, delay: Duration) -> Self {
        self.delay_on(Hook::Check, delay)
    }

    pub fn into_service(self) -> Arc<dyn Service> {
        Arc::new(self)
    }

    pub fn into_health(mut self) -> Arc<dyn HealthCheckable> {
        self.health.get_or_insert(HealthStatus::Healthy);
        Arc::new(self)
    }

    pub fn into_tracer(mut self) -> Arc<dyn TracerService> {
        self.tracing = true;
        Arc::new(self)
    }

    pub fn into_metrics(mut self) -> Arc<dyn MetricsService> {
        self.metrics = true;
        Arc::new(self)
    }

    async fn call(&self, hook: Hook) -> Result<(), ServiceError> {
        if hook != Hook::Check {
            self.log.record(format!("{}:{}", hook.label(), self.name));
        }
        for (delayed, delay) in &self.delays {
            if *delayed == hook {
                tokio::time::sleep(*delay).await;
            }
        }
        if self.panicking.contains(&hook) {
            panic!("mock {} panic in '{}'", hook.label(), self.name);
        }
        if self.failing.contains(&hook) {
            return Err(Box::new(MockFailure {
                service: self.name.clone(),
                hook: hook.label(),
            }));
        }
        Ok(())
    }

    fn remember_app(&self, app: Option<AppHandle>) -> Option<AppHandle> {
        let mut slot = self.armed_on.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, app)
    }
}

impl fmt::Debug for MockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockService")
            .field("name", &self.name)
            .field("health", &self.health)
            .field("tracing", &self.tracing)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Service for MockService {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn as_health_checkable(self: Arc<Self>) -> Option<Arc<dyn HealthCheckable>> {
        if self.health.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_tracer(self: Arc<Self>) -> Option<Arc<dyn TracerService>> {
        if self.tracing {
            Some(self)
        } else {
            None
        }
    }

    fn as_metrics(self: Arc<Self>) -> Option<Arc<dyn MetricsService>> {
        if self.metrics {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl HealthCheckable for MockService {
    async fn init(&self, _ctx: &InitContext) -> Result<(), ServiceError> {
        self.call(Hook::Init).await
    }

    async fn clean(&self) -> Result<(), ServiceError> {
        self.call(Hook::Clean).await
    }

    async fn health_check(&self) -> Result<HealthCheckResult, ServiceError> {
        self.call(Hook::Check).await?;
        let status = self.health.unwrap_or(HealthStatus::Healthy);
        Ok(HealthCheckResult::new(&self.name, status, format!("mock reports {status}")))
    }
}

#[async_trait]
impl TracerService for MockService {
    async fn arm(&self, ctx: &InitContext) -> Result<(), ServiceError> {
        self.call(Hook::Arm).await?;
        ctx.app().attach_instrumentation(&self.name);
        self.remember_app(Some(ctx.app().clone()));
        Ok(())
    }

    async fn disarm(&self) -> Result<(), ServiceError> {
        if let Some(app) = self.remember_app(None) {
            app.detach_instrumentation(&self.name);
        }
        self.call(Hook::Disarm).await
    }
}

#[async_trait]
impl MetricsService for MockService {
    async fn enable(&self, _ctx: &InitContext) -> Result<(), ServiceError> {
        self.call(Hook::Enable).await
    }

    async fn disable(&self) -> Result<(), ServiceError> {
        self.call(Hook::Disable).await
    }
}

/// Served application that only records what happens to it.
#[derive(Debug, Default)]
pub struct MockApp {
    attached: Mutex<Vec<String>>,
    served: Mutex<Vec<(String, u16, bool)>>,
    fail_serve: bool,
}

impl MockApp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_serve: true,
            ..Self::default()
        })
    }

    /// Currently attached instrumentation labels, in attach order.
    pub fn attached(&self) -> Vec<String> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn served(&self) -> Vec<(String, u16, bool)> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ServedApp for MockApp {
    fn name(&self) -> &str {
        "mock-app"
    }

    fn attach_instrumentation(&self, label: &str) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(label.to_string());
    }

    fn detach_instrumentation(&self, label: &str) {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| l != label);
    }

    async fn serve(&self, host: &str, port: u16, reload: bool) -> Result<(), ServiceError> {
        self.served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((host.to_string(), port, reload));
        if self.fail_serve {
            return Err("mock server refused to start".into());
        }
        Ok(())
    }
}

/// The configuration used throughout the test suite.
pub fn test_config() -> ServiceConfig {
    ServiceConfig::builder("svc")
        .host("localhost")
        .port(8080)
        .version("1.0")
        .workers(1)
        .debug_mode(true)
        .environment("development")
        .build()
        .unwrap_or_else(|e| unreachable!("static test config is valid: {e}"))
}

/// An [`InitContext`] over [`test_config`] and a fresh [`MockApp`].
pub fn context() -> (InitContext, Arc<MockApp>) {
    let app = MockApp::new();
    let ctx = InitContext::new(Arc::new(test_config()), app.clone());
    (ctx, app)
}
