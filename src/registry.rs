//! # Managed Service Registry
//!
//! [`ManagedServices`] is the generic core shared by the health, tracer and
//! metrics managers. It owns:
//!
//! - an ordered, name-unique list of services (registration order matters),
//! - the manager's [`StateCell`],
//! - a count of how many services are currently armed.
//!
//! ## All-or-nothing initialization
//!
//! Services are started one by one in registration order. If one fails, the
//! ones already started are stopped in reverse order before the error is
//! returned, and the manager ends in `FAILED`. Cleanup (`clean`) always stops
//! services LIFO and keeps going past individual failures.
//!
//! The armed counter is updated after every successful start, so if the
//! initialization future is dropped halfway (cancellation), [`abort`]
//! knows exactly which services to stop.
//!
//! [`abort`]: ManagedServices::abort

use crate::error::{ManagerError, RegistryError, ServiceFailure};
use crate::service::{Hooks, InitContext};
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState, StateCell};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) struct ManagedServices<S: ?Sized> {
    kind: ManagerKind,
    state: StateCell,
    services: Vec<Arc<S>>,
    armed: usize,
}

impl<S: ?Sized + Hooks> ManagedServices<S> {
    pub(crate) fn new(kind: ManagerKind) -> Self {
        Self {
            kind,
            state: StateCell::new(),
            services: Vec::new(),
            armed: 0,
        }
    }

    pub(crate) fn state(&self) -> ManagerState {
        self.state.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.services.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<S>> {
        self.services.iter()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<S>> {
        self.services.iter().find(|s| s.service_name() == name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| s.service_name().to_string())
            .collect()
    }

    pub(crate) fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            kind: self.kind,
            state: self.state(),
            services: self.names(),
        }
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        match self.state() {
            ManagerState::Uninitialized => Ok(()),
            state => Err(RegistryError::RegistrationClosed {
                manager: self.kind,
                state,
            }),
        }
    }

    pub(crate) fn register(&mut self, service: Arc<S>) -> Result<(), RegistryError> {
        let name = service.service_name().to_string();
        debug!(manager = %self.kind, service = %name, "Register");
        self.ensure_open()?;
        if self.get(&name).is_some() {
            warn!(manager = %self.kind, service = %name, "Duplicate registration rejected");
            return Err(RegistryError::DuplicateService {
                manager: self.kind,
                service: name,
            });
        }
        self.services.push(service);
        info!(manager = %self.kind, service = %name, size = self.services.len(), "Registered");
        Ok(())
    }

    pub(crate) fn unregister(&mut self, name: &str) -> Result<Arc<S>, RegistryError> {
        if !matches!(
            self.state(),
            ManagerState::Uninitialized | ManagerState::Closed | ManagerState::Failed
        ) {
            return Err(RegistryError::RegistrationClosed {
                manager: self.kind,
                state: self.state(),
            });
        }
        let Some(index) = self.services.iter().position(|s| s.service_name() == name) else {
            warn!(manager = %self.kind, service = name, "Not found");
            return Err(RegistryError::ServiceNotFound {
                manager: Some(self.kind),
                service: name.to_string(),
            });
        };
        let service = self.services.remove(index);
        info!(manager = %self.kind, service = name, size = self.services.len(), "Unregistered");
        Ok(service)
    }

    fn transition(&mut self, next: ManagerState) -> Result<(), ManagerError> {
        self.state.advance(next).map_err(|source| ManagerError::Transition {
            manager: self.kind,
            source,
        })
    }

    /// Starts every service in registration order, all-or-nothing.
    pub(crate) async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError> {
        match self.state() {
            ManagerState::Uninitialized => {}
            ManagerState::Ready | ManagerState::Initializing => {
                return Err(ManagerError::AlreadyInitialized { manager: self.kind })
            }
            state => return Err(ManagerError::Terminal { manager: self.kind, state }),
        }
        self.transition(ManagerState::Initializing)?;
        info!(manager = %self.kind, count = self.services.len(), "Initializing");

        while self.armed < self.services.len() {
            let service = self.services[self.armed].clone();
            let name = service.service_name().to_string();
            debug!(manager = %self.kind, service = %name, "Starting service");

            if let Err(source) = service.start(ctx).await {
                error!(manager = %self.kind, service = %name, error = %source, "Service failed to start");
                let rollback_failures = self.stop_armed().await;
                self.transition(ManagerState::Failed)?;
                return Err(ManagerError::ServiceInit {
                    manager: self.kind,
                    service: name,
                    source,
                    rollback_failures,
                });
            }
            self.armed += 1;
        }

        self.transition(ManagerState::Ready)?;
        info!(manager = %self.kind, count = self.armed, "Ready");
        Ok(())
    }

    /// Stops every armed service LIFO. A no-op unless the manager is `READY`.
    pub(crate) async fn clean(&mut self) -> Result<(), ManagerError> {
        match self.state() {
            ManagerState::Ready => {}
            state => {
                debug!(manager = %self.kind, %state, "Clean skipped");
                return Ok(());
            }
        }
        self.transition(ManagerState::TearingDown)?;
        info!(manager = %self.kind, count = self.armed, "Tearing down");

        let failures = self.stop_armed().await;
        self.transition(ManagerState::Closed)?;

        if failures.is_empty() {
            info!(manager = %self.kind, "Closed");
            Ok(())
        } else {
            warn!(manager = %self.kind, failed = failures.len(), "Closed with failures");
            Err(ManagerError::ServiceClean {
                manager: self.kind,
                failures,
            })
        }
    }

    /// Compensates an initialization that was interrupted mid-way.
    pub(crate) async fn abort(&mut self) -> Result<(), ManagerError> {
        if self.state() != ManagerState::Initializing {
            return Ok(());
        }
        warn!(manager = %self.kind, armed = self.armed, "Aborting interrupted initialization");
        let failures = self.stop_armed().await;
        self.transition(ManagerState::Failed)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::ServiceClean {
                manager: self.kind,
                failures,
            })
        }
    }

    async fn stop_armed(&mut self) -> Vec<ServiceFailure> {
        let mut failures = Vec::new();
        while self.armed > 0 {
            self.armed -= 1;
            let service = self.services[self.armed].clone();
            let name = service.service_name().to_string();
            debug!(manager = %self.kind, service = %name, "Stopping service");
            if let Err(source) = service.stop().await {
                warn!(manager = %self.kind, service = %name, error = %source, "Service failed to stop");
                failures.push(ServiceFailure {
                    service: name,
                    source,
                });
            }
        }
        failures
    }
}
