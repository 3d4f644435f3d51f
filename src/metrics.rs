//! Metrics manager: enables and disables metrics exporters.

use crate::error::{ManagerError, RegistryError};
use crate::registry::ManagedServices;
use crate::service::{InitContext, MetricsService};
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState};
use std::sync::Arc;

/// Same contract as [`TracerManager`](crate::tracer::TracerManager), scoped
/// to metrics exporters.
pub struct MetricsManager {
    exporters: ManagedServices<dyn MetricsService>,
}

impl Default for MetricsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsManager {
    pub fn new() -> Self {
        Self {
            exporters: ManagedServices::new(ManagerKind::Metrics),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.exporters.state()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.exporters.snapshot()
    }

    pub fn register(&mut self, exporter: Arc<dyn MetricsService>) -> Result<(), RegistryError> {
        self.exporters.register(exporter)
    }

    pub fn unregister(&mut self, service_name: &str) -> Result<Arc<dyn MetricsService>, RegistryError> {
        self.exporters.unregister(service_name)
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<dyn MetricsService>> {
        self.exporters.get(service_name).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.exporters.names()
    }

    pub async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError> {
        self.exporters.init(ctx).await
    }

    pub async fn clean(&mut self) -> Result<(), ManagerError> {
        self.exporters.clean().await
    }

    pub(crate) async fn abort(&mut self) -> Result<(), ManagerError> {
        self.exporters.abort().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{context, CallLog, Hook, MockService};

    #[tokio::test]
    async fn test_enable_disable_cycle() {
        let log = CallLog::new();
        let mut manager = MetricsManager::new();
        manager
            .register(MockService::new("prometheus").with_log(&log).into_metrics())
            .unwrap();
        let (ctx, _app) = context();

        manager.init(&ctx).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Ready);
        manager.clean().await.unwrap();
        // second clean does nothing
        manager.clean().await.unwrap();

        assert_eq!(log.entries(), vec!["enable:prometheus", "disable:prometheus"]);
        assert_eq!(manager.state(), ManagerState::Closed);
    }

    #[tokio::test]
    async fn test_disable_failures_are_collected() {
        let log = CallLog::new();
        let mut manager = MetricsManager::new();
        manager
            .register(MockService::new("a").with_log(&log).fail_on(Hook::Disable).into_metrics())
            .unwrap();
        manager
            .register(MockService::new("b").with_log(&log).into_metrics())
            .unwrap();
        let (ctx, _app) = context();
        manager.init(&ctx).await.unwrap();

        let err = manager.clean().await.unwrap_err();
        match err {
            ManagerError::ServiceClean { manager: kind, failures } => {
                assert_eq!(kind, ManagerKind::Metrics);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].service, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
        // b was still disabled even though a failed afterwards
        assert_eq!(log.entries(), vec!["enable:a", "enable:b", "disable:b", "disable:a"]);
        assert_eq!(manager.state(), ManagerState::Closed);
    }

    #[tokio::test]
    async fn test_unregister() {
        let mut manager = MetricsManager::new();
        manager.register(MockService::new("a").into_metrics()).unwrap();
        assert!(manager.unregister("a").is_ok());
        assert!(manager.get("a").is_none());
        assert!(matches!(
            manager.unregister("a"),
            Err(RegistryError::ServiceNotFound { .. })
        ));
    }
}
