//! # Application Façade
//!
//! [`ApplicationManager`] is the single handle a service process holds. It
//! owns the served application, the configuration and a
//! [`LifeCycleManager`], and exposes:
//!
//! - **Registration**: [`add_service`](ApplicationManager::add_service) routes
//!   a service to every manager matching its declared capabilities.
//! - **Startup**: [`initialize_application`](ApplicationManager::initialize_application)
//!   stores the config and brings up the enabled managers, all-or-nothing.
//! - **Serving**: [`run`](ApplicationManager::run) hands control to the
//!   hosting framework.
//! - **Scoped use**: [`scope`](ApplicationManager::scope) acquires, runs a
//!   body and always tears down exactly once, whether the body returns,
//!   fails, panics or is cancelled.
//!
//! ```rust
//! use applaunch::application::{ApplicationManager, Startup};
//! use applaunch::error::ApplicationError;
//! use applaunch::health::HealthStatus;
//! use applaunch::lifecycle::InitFlags;
//! use applaunch::mock::{test_config, MockApp, MockService};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ApplicationError> {
//! let mut manager = ApplicationManager::new(MockApp::new());
//! manager.add_service(MockService::new("db").with_health(HealthStatus::Healthy).into_service())?;
//! manager.add_service(MockService::new("jaeger").tracing().into_service())?;
//!
//! let startup = Startup::new(test_config(), InitFlags::new(true, true, false));
//! let overall = manager
//!     .scope(Some(startup), &CancellationToken::new(), |app| {
//!         Box::pin(async move { Ok::<_, ApplicationError>(app.check_health(None).await?.overall()) })
//!     })
//!     .await?;
//! assert_eq!(overall, HealthStatus::Healthy);
//! # Ok(())
//! # }
//! ```
//!
//! Several managers can live in one process; nothing here is global.

use crate::config::ServiceConfig;
use crate::error::{AggregatedTeardownError, ApplicationError, LifecycleError, RegistryError};
use crate::health::{HealthManager, HealthReport};
use crate::lifecycle::{InitFlags, LifeCycleManager, Manager};
use crate::metrics::MetricsManager;
use crate::service::{AppHandle, Capabilities, InitContext, Service};
use crate::state::{ManagerKind, ManagerState};
use crate::table::TableManager;
use crate::tracer::TracerManager;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What [`ApplicationManager::scope`] initializes on entry.
#[derive(Debug, Clone)]
pub struct Startup {
    pub config: ServiceConfig,
    pub flags: InitFlags,
}

impl Startup {
    pub fn new(config: ServiceConfig, flags: InitFlags) -> Self {
        Self { config, flags }
    }
}

pub struct ApplicationManager {
    app: AppHandle,
    config: Option<Arc<ServiceConfig>>,
    flags: InitFlags,
    lifecycle: LifeCycleManager,
    table: TableManager,
}

impl ApplicationManager {
    pub fn new(app: AppHandle) -> Self {
        Self::with_lifecycle(app, LifeCycleManager::default())
    }

    /// Uses `check_timeout` as the per-probe health check limit.
    pub fn with_check_timeout(app: AppHandle, check_timeout: Duration) -> Self {
        let lifecycle = LifeCycleManager::new(
            HealthManager::with_timeout(check_timeout),
            TracerManager::new(),
            MetricsManager::new(),
        );
        Self::with_lifecycle(app, lifecycle)
    }

    pub fn with_lifecycle(app: AppHandle, lifecycle: LifeCycleManager) -> Self {
        Self {
            app,
            config: None,
            flags: InitFlags::default(),
            lifecycle,
            table: TableManager::new(),
        }
    }

    /// Replaces the console reporter, e.g. with a colored one.
    pub fn with_table(mut self, table: TableManager) -> Self {
        self.table = table;
        self
    }

    /// The served application, for route registration by the caller.
    pub fn get_app(&self) -> AppHandle {
        self.app.clone()
    }

    pub fn config(&self) -> Option<&ServiceConfig> {
        self.config.as_deref()
    }

    pub fn state(&self) -> ManagerState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &LifeCycleManager {
        &self.lifecycle
    }

    pub fn health(&self) -> &HealthManager {
        self.lifecycle.health()
    }

    pub fn tracers(&self) -> &TracerManager {
        self.lifecycle.tracer()
    }

    pub fn metrics(&self) -> &MetricsManager {
        self.lifecycle.metrics()
    }

    /// Registers `service` with every manager whose capability it declares.
    ///
    /// Either all matching managers accept the service or none keep it.
    pub fn add_service(&mut self, service: Arc<dyn Service>) -> Result<Capabilities, RegistryError> {
        let name = service.service_name().to_string();
        let capabilities = Capabilities::of(&service);
        if capabilities.is_empty() {
            warn!(service = %name, "Service declares no capability");
            return Err(RegistryError::UnsupportedService { service: name });
        }

        let mut routed = Vec::new();
        if let Err(e) = self.route(service, &mut routed) {
            for kind in routed.into_iter().rev() {
                if let Err(undo) = self.unroute(kind, &name) {
                    error!(manager = %kind, service = %name, error = %undo, "Could not undo registration");
                }
            }
            return Err(e);
        }

        info!(service = %name, capabilities = ?capabilities.iter().collect::<Vec<_>>(), "Service added");
        Ok(capabilities)
    }

    fn route(&mut self, service: Arc<dyn Service>, routed: &mut Vec<ManagerKind>) -> Result<(), RegistryError> {
        if let Some(health) = service.clone().as_health_checkable() {
            self.lifecycle.health_mut().register(health)?;
            routed.push(ManagerKind::Health);
        }
        if let Some(tracer) = service.clone().as_tracer() {
            self.lifecycle.tracer_mut().register(tracer)?;
            routed.push(ManagerKind::Tracer);
        }
        if let Some(exporter) = service.as_metrics() {
            self.lifecycle.metrics_mut().register(exporter)?;
            routed.push(ManagerKind::Metrics);
        }
        Ok(())
    }

    fn unroute(&mut self, kind: ManagerKind, name: &str) -> Result<(), RegistryError> {
        match kind {
            ManagerKind::Health => self.lifecycle.health_mut().unregister(name).map(drop),
            ManagerKind::Tracer => self.lifecycle.tracer_mut().unregister(name).map(drop),
            ManagerKind::Metrics => self.lifecycle.metrics_mut().unregister(name).map(drop),
        }
    }

    fn holders(&self, name: &str) -> Vec<ManagerKind> {
        let lifecycle = &self.lifecycle;
        ManagerKind::ORDER
            .into_iter()
            .filter(|kind| match kind {
                ManagerKind::Health => lifecycle.health().get(name).is_some(),
                ManagerKind::Tracer => lifecycle.tracer().get(name).is_some(),
                ManagerKind::Metrics => lifecycle.metrics().get(name).is_some(),
            })
            .collect()
    }

    /// Removes `name` from every manager holding it.
    pub fn remove_service(&mut self, name: &str) -> Result<Vec<ManagerKind>, RegistryError> {
        let holders = self.holders(name);
        if holders.is_empty() {
            return Err(RegistryError::ServiceNotFound {
                manager: None,
                service: name.to_string(),
            });
        }
        for kind in &holders {
            let state = self.lifecycle.manager(*kind).state();
            if matches!(state, ManagerState::Initializing | ManagerState::Ready) {
                return Err(RegistryError::RegistrationClosed { manager: *kind, state });
            }
        }
        for kind in &holders {
            self.unroute(*kind, name)?;
        }
        info!(service = name, managers = ?holders, "Service removed");
        Ok(holders)
    }

    pub async fn initialize_application(&mut self, config: ServiceConfig, flags: InitFlags) -> Result<(), ApplicationError> {
        self.initialize_application_with_cancel(config, flags, &CancellationToken::new())
            .await
    }

    /// Stores `config` and brings up every enabled manager.
    ///
    /// On success the configuration, health and instrumentation tables are
    /// printed. On failure no manager is left READY.
    pub async fn initialize_application_with_cancel(
        &mut self,
        config: ServiceConfig,
        flags: InitFlags,
        cancel: &CancellationToken,
    ) -> Result<(), ApplicationError> {
        match self.state() {
            ManagerState::Uninitialized => {}
            ManagerState::Initializing | ManagerState::Ready => return Err(LifecycleError::AlreadyInitialized.into()),
            state => return Err(LifecycleError::Terminal { state }.into()),
        }

        let config = Arc::new(config);
        info!(
            service = config.service_name(),
            version = config.version(),
            environment = %config.environment(),
            "Initializing application"
        );
        self.config = Some(config.clone());
        self.flags = flags;

        let ctx = InitContext::new(config, self.app.clone());
        self.lifecycle.initialize_with_cancel(&ctx, flags, cancel).await?;

        if flags.with_health_check {
            self.lifecycle.health().check_all().await;
        }
        self.table.print(&self.report());
        Ok(())
    }

    /// Console report of the current configuration and manager state.
    pub fn report(&self) -> String {
        let mut report = match self.config() {
            Some(config) => self.table.render_config(config),
            None => String::from("(not configured)"),
        };
        let health = self.lifecycle.health().last_report();
        let tracer = self.lifecycle.tracer().snapshot();
        let metrics = self.lifecycle.metrics().snapshot();

        report.push_str("\n\n");
        report.push_str(&self.table.render(
            health.as_ref().filter(|_| self.flags.with_health_check),
            Some(&tracer).filter(|_| self.flags.with_tracers),
            Some(&metrics).filter(|_| self.flags.with_metrics),
        ));
        report
    }

    pub async fn check_health(&self, service_name: Option<&str>) -> Result<HealthReport, ApplicationError> {
        Ok(self.lifecycle.health().check_health(service_name).await?)
    }

    fn ensure_ready(&self) -> Result<(), ApplicationError> {
        match self.state() {
            ManagerState::Ready => Ok(()),
            state => Err(ApplicationError::NotInitialized { state }),
        }
    }

    /// Hands control to the served application's serving loop.
    pub async fn run(&self, host: &str, port: u16, reload: bool) -> Result<(), ApplicationError> {
        self.ensure_ready()?;
        info!(app = self.app.name(), host, port, reload, "Serving application");
        self.app
            .serve(host, port, reload)
            .await
            .map_err(ApplicationError::Serve)
    }

    /// [`run`](Self::run) on the configured host and port, reloading in debug mode.
    pub async fn serve(&self) -> Result<(), ApplicationError> {
        self.ensure_ready()?;
        let config = self
            .config
            .clone()
            .ok_or(ApplicationError::NotInitialized { state: self.state() })?;
        self.run(config.host(), config.port(), config.debug_mode()).await
    }

    /// Tears down every READY manager. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<(), AggregatedTeardownError> {
        self.lifecycle.teardown().await
    }

    /// Acquire, use, always release.
    ///
    /// Initializes with `startup` if given, runs `body` until it finishes or
    /// `cancel` fires, then tears down exactly once. A panic in `body` is
    /// resumed after teardown. If both `body` and teardown fail the error is
    /// [`ApplicationError::Scope`] carrying both.
    pub async fn scope<T, F>(
        &mut self,
        startup: Option<Startup>,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, ApplicationError>
    where
        F: for<'a> FnOnce(&'a ApplicationManager) -> BoxFuture<'a, Result<T, ApplicationError>>,
    {
        let acquired = match startup {
            Some(Startup { config, flags }) => self.initialize_application_with_cancel(config, flags, cancel).await,
            None => Ok(()),
        };

        let outcome = match acquired {
            Ok(()) => {
                let run = AssertUnwindSafe(body(&*self)).catch_unwind();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        warn!("Scope cancelled");
                        Ok(Err(ApplicationError::Cancelled))
                    }
                    finished = run => finished,
                }
            }
            Err(e) => Ok(Err(e)),
        };

        debug!("Leaving scope");
        let teardown = self.shutdown().await;

        match outcome {
            Err(panic) => {
                if let Err(e) = teardown {
                    error!(error = %e, "Teardown failed while unwinding");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Ok(value)) => teardown
                .map(|()| value)
                .map_err(|e| LifecycleError::Teardown(e).into()),
            Ok(Err(body)) => match teardown {
                Ok(()) => Err(body),
                Err(teardown) => Err(ApplicationError::Scope {
                    body: Box::new(body),
                    teardown,
                }),
            },
        }
    }
}

impl Drop for ApplicationManager {
    fn drop(&mut self) {
        if matches!(self.state(), ManagerState::Ready | ManagerState::Initializing) {
            warn!(
                managers = ?self.lifecycle.initialized(),
                state = %self.state(),
                "ApplicationManager dropped while running; call shutdown() first"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use crate::mock::{test_config, CallLog, Hook, MockApp, MockService};

    fn explode() -> Result<(), ApplicationError> {
        panic!("boom")
    }

    fn flags() -> InitFlags {
        InitFlags::new(true, true, false)
    }

    #[test]
    fn test_add_service_routes_by_capability() {
        let mut manager = ApplicationManager::new(MockApp::new());
        let capabilities = manager
            .add_service(
                MockService::new("otel")
                    .with_health(HealthStatus::Healthy)
                    .tracing()
                    .metrics()
                    .into_service(),
            )
            .unwrap();

        assert_eq!(capabilities, Capabilities { health_check: true, tracing: true, metrics: true });
        assert_eq!(manager.health().service_names(), vec!["otel"]);
        assert_eq!(manager.tracers().service_names(), vec!["otel"]);
        assert_eq!(manager.metrics().service_names(), vec!["otel"]);
    }

    #[test]
    fn test_service_without_capability_rejected() {
        let mut manager = ApplicationManager::new(MockApp::new());
        let err = manager.add_service(MockService::new("plain").into_service()).unwrap_err();
        assert_eq!(err, RegistryError::UnsupportedService { service: "plain".into() });
    }

    #[test]
    fn test_failed_routing_leaves_no_partial_registration() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager.add_service(MockService::new("x").tracing().into_service()).unwrap();

        let err = manager
            .add_service(
                MockService::new("x")
                    .with_health(HealthStatus::Healthy)
                    .tracing()
                    .into_service(),
            )
            .unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateService { manager: ManagerKind::Tracer, .. }));
        assert!(manager.health().service_names().is_empty());
        assert_eq!(manager.tracers().service_names(), vec!["x"]);
    }

    #[test]
    fn test_same_name_in_different_managers() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_health(HealthStatus::Healthy).into_service())
            .unwrap();
        manager.add_service(MockService::new("db").metrics().into_service()).unwrap();

        assert_eq!(manager.remove_service("db").unwrap(), vec![ManagerKind::Health, ManagerKind::Metrics]);
        assert!(matches!(
            manager.remove_service("db"),
            Err(RegistryError::ServiceNotFound { manager: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_rejected_while_ready() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_health(HealthStatus::Healthy).into_service())
            .unwrap();
        manager.initialize_application(test_config(), flags()).await.unwrap();

        assert!(matches!(
            manager.remove_service("db"),
            Err(RegistryError::RegistrationClosed { manager: ManagerKind::Health, state: ManagerState::Ready })
        ));

        manager.shutdown().await.unwrap();
        assert!(manager.remove_service("db").is_ok());
    }

    #[tokio::test]
    async fn test_run_requires_initialization() {
        let app = MockApp::new();
        let mut manager = ApplicationManager::new(app.clone());

        assert!(matches!(
            manager.run("0.0.0.0", 9000, false).await,
            Err(ApplicationError::NotInitialized { state: ManagerState::Uninitialized })
        ));

        manager.initialize_application(test_config(), flags()).await.unwrap();
        manager.run("0.0.0.0", 9000, false).await.unwrap();
        manager.serve().await.unwrap();
        assert_eq!(
            app.served(),
            vec![("0.0.0.0".to_string(), 9000, false), ("localhost".to_string(), 8080, true)]
        );

        manager.shutdown().await.unwrap();
        assert!(matches!(
            manager.serve().await,
            Err(ApplicationError::NotInitialized { state: ManagerState::Closed })
        ));
    }

    #[tokio::test]
    async fn test_serve_failure_is_reported() {
        let mut manager = ApplicationManager::new(MockApp::failing());
        manager.initialize_application(test_config(), flags()).await.unwrap();
        assert!(matches!(manager.serve().await, Err(ApplicationError::Serve(_))));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_twice_rejected() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager.initialize_application(test_config(), flags()).await.unwrap();
        let err = manager.initialize_application(test_config(), flags()).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Lifecycle(LifecycleError::AlreadyInitialized)));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_report_after_initialization() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_health(HealthStatus::Healthy).into_service())
            .unwrap();
        manager.add_service(MockService::new("jaeger").tracing().into_service()).unwrap();
        manager.initialize_application(test_config(), flags()).await.unwrap();

        let report = manager.report();
        assert!(report.contains("svc started"));
        assert!(report.contains("(overall HEALTHY)"));
        assert!(report.contains("jaeger"));
        // metrics manager was not enabled
        assert_eq!(report.matches("UNAVAILABLE").count(), 1);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scope_tears_down_on_success() {
        let log = CallLog::new();
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_log(&log).with_health(HealthStatus::Healthy).into_service())
            .unwrap();

        let state = manager
            .scope(Some(Startup::new(test_config(), flags())), &CancellationToken::new(), |app| {
                Box::pin(async move { Ok::<_, ApplicationError>(app.state()) })
            })
            .await
            .unwrap();

        assert_eq!(state, ManagerState::Ready);
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(log.entries(), vec!["init:db", "clean:db"]);
    }

    #[tokio::test]
    async fn test_scope_body_error_wins() {
        let log = CallLog::new();
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_log(&log).with_health(HealthStatus::Healthy).into_service())
            .unwrap();

        let err = manager
            .scope::<(), _>(Some(Startup::new(test_config(), flags())), &CancellationToken::new(), |_| {
                Box::pin(async { Err::<(), _>(ApplicationError::Cancelled) })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApplicationError::Cancelled));
        assert_eq!(log.count("clean:db"), 1);
    }

    #[tokio::test]
    async fn test_scope_reports_body_and_teardown_failures() {
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(
                MockService::new("db")
                    .with_health(HealthStatus::Healthy)
                    .fail_on(Hook::Clean)
                    .into_service(),
            )
            .unwrap();

        let err = manager
            .scope::<(), _>(Some(Startup::new(test_config(), flags())), &CancellationToken::new(), |app| {
                Box::pin(async move {
                    app.check_health(Some("missing")).await?;
                    Ok::<_, ApplicationError>(())
                })
            })
            .await
            .unwrap_err();

        match err {
            ApplicationError::Scope { body, teardown } => {
                assert!(matches!(*body, ApplicationError::Registry(RegistryError::ServiceNotFound { .. })));
                assert_eq!(teardown.failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_scope_cancellation_still_tears_down() {
        let log = CallLog::new();
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_log(&log).with_health(HealthStatus::Healthy).into_service())
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = manager
            .scope::<(), _>(Some(Startup::new(test_config(), flags())), &cancel, |_| {
                Box::pin(futures::future::pending::<Result<(), ApplicationError>>())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApplicationError::Cancelled));
        assert_eq!(manager.state(), ManagerState::Closed);
        assert_eq!(log.entries(), vec!["init:db", "clean:db"]);
    }

    #[tokio::test]
    async fn test_scope_panic_resumes_after_teardown() {
        let log = CallLog::new();
        let mut manager = ApplicationManager::new(MockApp::new());
        manager
            .add_service(MockService::new("db").with_log(&log).with_health(HealthStatus::Healthy).into_service())
            .unwrap();

        let unwound = AssertUnwindSafe(manager.scope::<(), _>(
            Some(Startup::new(test_config(), flags())),
            &CancellationToken::new(),
            |_| Box::pin(async { explode() }),
        ))
        .catch_unwind()
        .await;

        assert!(unwound.is_err());
        assert_eq!(log.entries(), vec!["init:db", "clean:db"]);
    }
}
