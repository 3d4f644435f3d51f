//! # Service Capabilities
//!
//! A *service* is a pluggable unit identified by its name. What a manager can
//! do with it is declared explicitly through capability accessors on
//! [`Service`] instead of being probed at runtime:
//!
//! | Capability | Trait | Owning manager | Hooks |
//! |---|---|---|---|
//! | health check | [`HealthCheckable`] | `HealthManager` | `init`, `clean`, `health_check` |
//! | tracing | [`TracerService`] | `TracerManager` | `arm`, `disarm` |
//! | metrics | [`MetricsService`] | `MetricsManager` | `enable`, `disable` |
//!
//! Each capability has its own hook names, so a service that is both
//! health-checkable and a tracer is initialized once per capability and never
//! twice for the same one.
//!
//! ## Declaring capabilities
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use applaunch::service::{InitContext, Service, TracerService};
//! use applaunch::error::ServiceError;
//!
//! struct Jaeger;
//!
//! impl Service for Jaeger {
//!     fn service_name(&self) -> &str { "jaeger" }
//!     fn as_tracer(self: Arc<Self>) -> Option<Arc<dyn TracerService>> { Some(self) }
//! }
//!
//! #[async_trait]
//! impl TracerService for Jaeger {
//!     async fn arm(&self, ctx: &InitContext) -> Result<(), ServiceError> {
//!         ctx.app().attach_instrumentation(self.service_name());
//!         Ok(())
//!     }
//!     async fn disarm(&self) -> Result<(), ServiceError> { Ok(()) }
//! }
//! ```
//!
//! ## Context injection
//!
//! Hooks receive an [`InitContext`] at initialization time (not at
//! construction), carrying the validated config and the served application
//! handle.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::health::HealthCheckResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Identity plus capability declaration shared by every service.
pub trait Service: Send + Sync + 'static {
    fn service_name(&self) -> &str;

    fn as_health_checkable(self: Arc<Self>) -> Option<Arc<dyn HealthCheckable>> {
        None
    }

    fn as_tracer(self: Arc<Self>) -> Option<Arc<dyn TracerService>> {
        None
    }

    fn as_metrics(self: Arc<Self>) -> Option<Arc<dyn MetricsService>> {
        None
    }
}

/// A service the `HealthManager` can probe.
#[async_trait]
pub trait HealthCheckable: Service {
    async fn init(&self, _ctx: &InitContext) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn clean(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Probes the dependency. An `Err` (or a timeout) is reported as `UNKNOWN`.
    async fn health_check(&self) -> Result<HealthCheckResult, ServiceError>;
}

/// A tracing exporter that instruments the served application.
#[async_trait]
pub trait TracerService: Service {
    async fn arm(&self, ctx: &InitContext) -> Result<(), ServiceError>;

    async fn disarm(&self) -> Result<(), ServiceError>;
}

/// A metrics exporter.
#[async_trait]
pub trait MetricsService: Service {
    async fn enable(&self, ctx: &InitContext) -> Result<(), ServiceError>;

    async fn disable(&self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HealthCheck,
    Tracing,
    Metrics,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::HealthCheck => "health-check",
            Capability::Tracing => "tracing",
            Capability::Metrics => "metrics",
        };
        f.write_str(s)
    }
}

/// The set of capabilities a service declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub health_check: bool,
    pub tracing: bool,
    pub metrics: bool,
}

impl Capabilities {
    pub fn of(service: &Arc<dyn Service>) -> Self {
        Self {
            health_check: service.clone().as_health_checkable().is_some(),
            tracing: service.clone().as_tracer().is_some(),
            metrics: service.clone().as_metrics().is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.health_check || self.tracing || self.metrics)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> {
        [
            (self.health_check, Capability::HealthCheck),
            (self.tracing, Capability::Tracing),
            (self.metrics, Capability::Metrics),
        ]
        .into_iter()
        .filter_map(|(declared, capability)| declared.then_some(capability))
    }
}

/// The application served by the hosting web framework.
///
/// The core never defines HTTP semantics; it only attaches instrumentation
/// and hands control to [`serve`](ServedApp::serve).
#[async_trait]
pub trait ServedApp: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn attach_instrumentation(&self, _label: &str) {}

    fn detach_instrumentation(&self, _label: &str) {}

    async fn serve(&self, host: &str, port: u16, reload: bool) -> Result<(), ServiceError>;
}

pub type AppHandle = Arc<dyn ServedApp>;

/// Dependencies injected into every service hook at initialization.
#[derive(Clone)]
pub struct InitContext {
    config: Arc<ServiceConfig>,
    app: AppHandle,
}

impl InitContext {
    pub fn new(config: Arc<ServiceConfig>, app: AppHandle) -> Self {
        Self { config, app }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn app(&self) -> &AppHandle {
        &self.app
    }

    pub fn service_name(&self) -> &str {
        self.config.service_name()
    }
}

impl fmt::Debug for InitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext")
            .field("config", &self.config)
            .field("app", &self.app.name())
            .finish()
    }
}

/// Uniform start/stop view over the three capability traits, so one registry
/// implementation serves all managers.
pub(crate) trait Hooks: Service {
    fn start<'a>(&'a self, ctx: &'a InitContext) -> BoxFuture<'a, Result<(), ServiceError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), ServiceError>>;
}

impl Hooks for dyn HealthCheckable {
    fn start<'a>(&'a self, ctx: &'a InitContext) -> BoxFuture<'a, Result<(), ServiceError>> {
        self.init(ctx)
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        self.clean()
    }
}

impl Hooks for dyn TracerService {
    fn start<'a>(&'a self, ctx: &'a InitContext) -> BoxFuture<'a, Result<(), ServiceError>> {
        self.arm(ctx)
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        self.disarm()
    }
}

impl Hooks for dyn MetricsService {
    fn start<'a>(&'a self, ctx: &'a InitContext) -> BoxFuture<'a, Result<(), ServiceError>> {
        self.enable(ctx)
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        self.disable()
    }
}
