//! # Error Taxonomy
//!
//! Errors are layered the same way the managers are:
//!
//! - [`ServiceError`]: whatever a pluggable service returns from a hook.
//! - [`RegistryError`]: registration-time problems (duplicates, unknown names).
//! - [`ManagerError`]: one manager failed to initialize or clean up.
//! - [`LifecycleError`]: the ordered multi-manager sequence failed; wraps
//!   [`LifecycleInitializationError`] or [`AggregatedTeardownError`].
//! - [`ApplicationError`]: everything surfaced by the façade.
//!
//! Health probe failures never appear here; they are folded into an
//! `UNKNOWN` health result instead.

use crate::config::ConfigurationError;
use crate::state::{InvalidTransition, ManagerKind, ManagerState};
use std::fmt;
use thiserror::Error;

/// Error type returned by service hooks.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// A single service hook that failed, tagged with the service name.
#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub source: ServiceError,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.source)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service '{service}' is already registered with {manager}")]
    DuplicateService { manager: ManagerKind, service: String },
    #[error("service '{service}' declares no supported capability")]
    UnsupportedService { service: String },
    #[error("service '{service}' is not registered")]
    ServiceNotFound { manager: Option<ManagerKind>, service: String },
    #[error("{manager} does not accept registry changes while {state}")]
    RegistrationClosed { manager: ManagerKind, state: ManagerState },
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{manager} is already initialized")]
    AlreadyInitialized { manager: ManagerKind },
    #[error("{manager} is {state} and cannot be initialized again")]
    Terminal { manager: ManagerKind, state: ManagerState },
    #[error("{manager}: {source}")]
    Transition {
        manager: ManagerKind,
        #[source]
        source: InvalidTransition,
    },
    #[error("{manager} failed to initialize service '{service}': {source}")]
    ServiceInit {
        manager: ManagerKind,
        service: String,
        #[source]
        source: ServiceError,
        /// Compensating cleanups of already-initialized services that also failed.
        rollback_failures: Vec<ServiceFailure>,
    },
    #[error("{manager} failed to clean services: {}", join(.failures))]
    ServiceClean {
        manager: ManagerKind,
        failures: Vec<ServiceFailure>,
    },
}

impl ManagerError {
    pub fn manager(&self) -> ManagerKind {
        match self {
            ManagerError::AlreadyInitialized { manager }
            | ManagerError::Terminal { manager, .. }
            | ManagerError::Transition { manager, .. }
            | ManagerError::ServiceInit { manager, .. }
            | ManagerError::ServiceClean { manager, .. } => *manager,
        }
    }
}

/// First failure of an ordered initialization, after rollback has run.
#[derive(Debug, Error)]
#[error("{manager} failed during initialization (rolled back: {rolled_back:?}): {source}")]
pub struct LifecycleInitializationError {
    pub manager: ManagerKind,
    #[source]
    pub source: ManagerError,
    /// Managers cleaned up as compensation, in the order they were cleaned.
    pub rolled_back: Vec<ManagerKind>,
    pub rollback_failures: Vec<ManagerError>,
}

/// Every failure collected during a best-effort teardown.
#[derive(Debug, Error)]
#[error("teardown finished with {} failure(s): {}", .failures.len(), join(.failures))]
pub struct AggregatedTeardownError {
    pub failures: Vec<ManagerError>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Initialization(#[from] LifecycleInitializationError),
    #[error(transparent)]
    Teardown(#[from] AggregatedTeardownError),
    #[error("initialization cancelled (rolled back: {rolled_back:?})")]
    Cancelled {
        interrupted: Option<ManagerKind>,
        rolled_back: Vec<ManagerKind>,
        rollback_failures: Vec<ManagerError>,
    },
    #[error("lifecycle is already initialized")]
    AlreadyInitialized,
    #[error("{manager} is already {state}; the lifecycle only drives fresh managers")]
    ManagerInUse { manager: ManagerKind, state: ManagerState },
    #[error("lifecycle is {state} and cannot be initialized again")]
    Terminal { state: ManagerState },
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("application is not initialized (state {state})")]
    NotInitialized { state: ManagerState },
    #[error("application server failed: {0}")]
    Serve(#[source] ServiceError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{body} (teardown also failed: {teardown})")]
    Scope {
        body: Box<ApplicationError>,
        teardown: AggregatedTeardownError,
    },
}
