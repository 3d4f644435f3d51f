//! Tracer manager: arms and disarms tracing instrumentation on the served
//! application.

use crate::error::{ManagerError, RegistryError};
use crate::registry::ManagedServices;
use crate::service::{InitContext, TracerService};
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState};
use std::sync::Arc;

/// Registry of [`TracerService`]s with all-or-nothing arming.
///
/// - `init` twice without `clean` fails with `AlreadyInitialized`.
/// - `clean` before `init` is a no-op.
/// - If one tracer fails to arm, the ones already armed are disarmed in
///   reverse order before the error is returned.
pub struct TracerManager {
    tracers: ManagedServices<dyn TracerService>,
}

impl Default for TracerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TracerManager {
    pub fn new() -> Self {
        Self {
            tracers: ManagedServices::new(ManagerKind::Tracer),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.tracers.state()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.tracers.snapshot()
    }

    pub fn register(&mut self, tracer: Arc<dyn TracerService>) -> Result<(), RegistryError> {
        self.tracers.register(tracer)
    }

    pub fn unregister(&mut self, service_name: &str) -> Result<Arc<dyn TracerService>, RegistryError> {
        self.tracers.unregister(service_name)
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<dyn TracerService>> {
        self.tracers.get(service_name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.tracers.names()
    }

    pub async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError> {
        self.tracers.init(ctx).await
    }

    pub async fn clean(&mut self) -> Result<(), ManagerError> {
        self.tracers.clean().await
    }

    pub(crate) async fn abort(&mut self) -> Result<(), ManagerError> {
        self.tracers.abort().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{context, CallLog, Hook, MockService};

    #[tokio::test]
    async fn test_arm_and_disarm_order() {
        let log = CallLog::new();
        let mut manager = TracerManager::new();
        for name in ["jaeger", "zipkin", "otlp"] {
            manager
                .register(MockService::new(name).with_log(&log).into_tracer())
                .unwrap();
        }
        let (ctx, app) = context();

        manager.init(&ctx).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Ready);
        assert_eq!(app.attached(), vec!["jaeger", "zipkin", "otlp"]);

        manager.clean().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Closed);
        assert!(app.attached().is_empty());
        assert_eq!(
            log.entries(),
            vec![
                "arm:jaeger",
                "arm:zipkin",
                "arm:otlp",
                "disarm:otlp",
                "disarm:zipkin",
                "disarm:jaeger"
            ]
        );
    }

    #[tokio::test]
    async fn test_double_init_rejected() {
        let mut manager = TracerManager::new();
        manager.register(MockService::new("jaeger").into_tracer()).unwrap();
        let (ctx, _app) = context();

        manager.init(&ctx).await.unwrap();
        let err = manager.init(&ctx).await.unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyInitialized { manager: ManagerKind::Tracer }));
    }

    #[tokio::test]
    async fn test_clean_before_init_is_noop() {
        let log = CallLog::new();
        let mut manager = TracerManager::new();
        manager
            .register(MockService::new("jaeger").with_log(&log).into_tracer())
            .unwrap();

        manager.clean().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_arm_rolls_back() {
        let log = CallLog::new();
        let mut manager = TracerManager::new();
        manager
            .register(MockService::new("a").with_log(&log).into_tracer())
            .unwrap();
        manager
            .register(MockService::new("b").with_log(&log).into_tracer())
            .unwrap();
        manager
            .register(MockService::new("c").with_log(&log).fail_on(Hook::Arm).into_tracer())
            .unwrap();
        manager
            .register(MockService::new("d").with_log(&log).into_tracer())
            .unwrap();
        let (ctx, app) = context();

        let err = manager.init(&ctx).await.unwrap_err();
        match err {
            ManagerError::ServiceInit { service, rollback_failures, .. } => {
                assert_eq!(service, "c");
                assert!(rollback_failures.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.state(), ManagerState::Failed);
        assert!(app.attached().is_empty());
        assert_eq!(
            log.entries(),
            vec!["arm:a", "arm:b", "arm:c", "disarm:b", "disarm:a"]
        );

        // Failed is terminal.
        assert!(matches!(
            manager.init(&ctx).await,
            Err(ManagerError::Terminal { state: ManagerState::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn test_registration_closed_after_init() {
        let mut manager = TracerManager::new();
        let (ctx, _app) = context();
        manager.init(&ctx).await.unwrap();

        let err = manager.register(MockService::new("late").into_tracer()).unwrap_err();
        assert!(matches!(err, RegistryError::RegistrationClosed { state: ManagerState::Ready, .. }));
    }
}
