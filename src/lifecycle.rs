//! # Lifecycle Coordination
//!
//! [`LifeCycleManager`] owns the three service managers and drives them
//! through initialization and teardown in a fixed order:
//!
//! ```text
//! initialize:  health -> tracer -> metrics
//! teardown:    metrics -> tracer -> health   (only those that reached READY)
//! ```
//!
//! Health goes first because probes do not depend on telemetry; tracing goes
//! before metrics so that metrics export can itself be traced.
//!
//! ## Failure handling
//!
//! - **Initialization** is all-or-nothing. On the first manager failure every
//!   manager initialized so far is cleaned in reverse order, and the original
//!   failure is returned as a [`LifecycleInitializationError`].
//! - **Cancellation** during initialization behaves the same way: the manager
//!   being initialized is aborted (its armed services are stopped), earlier
//!   managers are rolled back, then [`LifecycleError::Cancelled`] is returned.
//! - **Teardown** is best-effort. Every READY manager is cleaned even if an
//!   earlier one failed; all failures come back together in an
//!   [`AggregatedTeardownError`]. Teardown never observes cancellation and is
//!   idempotent.
//! - **Dropped initialization**: if the `initialize` future itself is dropped
//!   (a timeout, a losing `select!` branch, an aborted task), the next
//!   `teardown` aborts the interrupted manager and rolls back the others.
//! - Only fresh managers are driven. If an enabled manager was initialized
//!   directly, `initialize` fails with [`LifecycleError::ManagerInUse`]
//!   before touching anything.
//!
//! ## Sequencing
//!
//! All managers are driven strictly one after another through `&mut self`,
//! so no two managers ever touch the served application at the same time.

use crate::error::{AggregatedTeardownError, LifecycleError, LifecycleInitializationError, ManagerError};
use crate::health::HealthManager;
use crate::metrics::MetricsManager;
use crate::service::InitContext;
use crate::state::{ManagerKind, ManagerSnapshot, ManagerState, StateCell};
use crate::tracer::TracerManager;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Common lifecycle contract of the service managers.
#[async_trait]
pub trait Manager: Send + Sync {
    fn kind(&self) -> ManagerKind;

    fn state(&self) -> ManagerState;

    fn snapshot(&self) -> ManagerSnapshot;

    async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError>;

    async fn clean(&mut self) -> Result<(), ManagerError>;

    /// Stops whatever a dropped `init` left armed and marks the manager `FAILED`.
    async fn abort(&mut self) -> Result<(), ManagerError>;
}

macro_rules! impl_manager {
    ($ty:ty, $kind:expr) => {
        #[async_trait]
        impl Manager for $ty {
            fn kind(&self) -> ManagerKind {
                $kind
            }

            fn state(&self) -> ManagerState {
                <$ty>::state(self)
            }

            fn snapshot(&self) -> ManagerSnapshot {
                <$ty>::snapshot(self)
            }

            async fn init(&mut self, ctx: &InitContext) -> Result<(), ManagerError> {
                <$ty>::init(self, ctx).await
            }

            async fn clean(&mut self) -> Result<(), ManagerError> {
                <$ty>::clean(self).await
            }

            async fn abort(&mut self) -> Result<(), ManagerError> {
                <$ty>::abort(self).await
            }
        }
    };
}

impl_manager!(HealthManager, ManagerKind::Health);
impl_manager!(TracerManager, ManagerKind::Tracer);
impl_manager!(MetricsManager, ManagerKind::Metrics);

/// Which managers `initialize` should bring up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitFlags {
    pub with_tracers: bool,
    pub with_health_check: bool,
    pub with_metrics: bool,
}

impl InitFlags {
    pub fn new(with_tracers: bool, with_health_check: bool, with_metrics: bool) -> Self {
        Self {
            with_tracers,
            with_health_check,
            with_metrics,
        }
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn is_enabled(&self, kind: ManagerKind) -> bool {
        match kind {
            ManagerKind::Health => self.with_health_check,
            ManagerKind::Tracer => self.with_tracers,
            ManagerKind::Metrics => self.with_metrics,
        }
    }
}

pub struct LifeCycleManager {
    health: HealthManager,
    tracer: TracerManager,
    metrics: MetricsManager,
    state: StateCell,
    /// Managers that reached READY, in initialization order.
    initialized: Vec<ManagerKind>,
    /// Manager whose `init` is currently being awaited.
    in_flight: Option<ManagerKind>,
}

impl Default for LifeCycleManager {
    fn default() -> Self {
        Self::new(HealthManager::new(), TracerManager::new(), MetricsManager::new())
    }
}

impl LifeCycleManager {
    pub fn new(health: HealthManager, tracer: TracerManager, metrics: MetricsManager) -> Self {
        Self {
            health,
            tracer,
            metrics,
            state: StateCell::new(),
            initialized: Vec::new(),
            in_flight: None,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state.get()
    }

    pub fn initialized(&self) -> &[ManagerKind] {
        &self.initialized
    }

    pub fn health(&self) -> &HealthManager {
        &self.health
    }

    pub fn tracer(&self) -> &TracerManager {
        &self.tracer
    }

    pub fn metrics(&self) -> &MetricsManager {
        &self.metrics
    }

    pub fn health_mut(&mut self) -> &mut HealthManager {
        &mut self.health
    }

    pub fn tracer_mut(&mut self) -> &mut TracerManager {
        &mut self.tracer
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsManager {
        &mut self.metrics
    }

    pub fn manager(&self, kind: ManagerKind) -> &dyn Manager {
        match kind {
            ManagerKind::Health => &self.health,
            ManagerKind::Tracer => &self.tracer,
            ManagerKind::Metrics => &self.metrics,
        }
    }

    fn manager_mut(&mut self, kind: ManagerKind) -> &mut dyn Manager {
        match kind {
            ManagerKind::Health => &mut self.health,
            ManagerKind::Tracer => &mut self.tracer,
            ManagerKind::Metrics => &mut self.metrics,
        }
    }

    pub fn snapshots(&self) -> Vec<ManagerSnapshot> {
        ManagerKind::ORDER
            .iter()
            .map(|kind| self.manager(*kind).snapshot())
            .collect()
    }

    fn set_state(&mut self, next: ManagerState) {
        match self.state.advance(next) {
            Ok(()) => debug!(state = %next, "Lifecycle state changed"),
            Err(e) => error!(error = %e, "Lifecycle state machine violated"),
        }
    }

    pub async fn initialize(&mut self, ctx: &InitContext, flags: InitFlags) -> Result<(), LifecycleError> {
        self.initialize_with_cancel(ctx, flags, &CancellationToken::new()).await
    }

    /// Initializes every enabled manager in order; see the module docs for
    /// rollback and cancellation semantics.
    pub async fn initialize_with_cancel(
        &mut self,
        ctx: &InitContext,
        flags: InitFlags,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        match self.state() {
            ManagerState::Uninitialized => {}
            ManagerState::Initializing | ManagerState::Ready => return Err(LifecycleError::AlreadyInitialized),
            state => return Err(LifecycleError::Terminal { state }),
        }
        if let Some(kind) = ManagerKind::ORDER
            .into_iter()
            .find(|kind| flags.is_enabled(*kind) && self.manager(*kind).state() != ManagerState::Uninitialized)
        {
            let state = self.manager(kind).state();
            warn!(manager = %kind, %state, "Manager was driven outside the lifecycle");
            return Err(LifecycleError::ManagerInUse { manager: kind, state });
        }
        self.set_state(ManagerState::Initializing);
        info!(?flags, service = ctx.service_name(), "Initializing managers");

        for kind in ManagerKind::ORDER {
            if !flags.is_enabled(kind) {
                debug!(manager = %kind, "Disabled, skipping");
                continue;
            }
            if cancel.is_cancelled() {
                return Err(self.unwind_cancelled(None).await);
            }

            self.in_flight = Some(kind);
            let outcome = {
                let manager = self.manager_mut(kind);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = manager.init(ctx) => Some(result),
                }
            };
            self.in_flight = None;

            match outcome {
                Some(Ok(())) => self.initialized.push(kind),
                Some(Err(source)) => {
                    error!(manager = %kind, error = %source, "Manager failed to initialize");
                    let (rolled_back, rollback_failures) = self.rollback().await;
                    self.set_state(ManagerState::Failed);
                    return Err(LifecycleInitializationError {
                        manager: kind,
                        source,
                        rolled_back,
                        rollback_failures,
                    }
                    .into());
                }
                None => return Err(self.unwind_cancelled(Some(kind)).await),
            }
        }

        self.set_state(ManagerState::Ready);
        info!(managers = ?self.initialized, "All managers ready");
        Ok(())
    }

    async fn unwind_cancelled(&mut self, interrupted: Option<ManagerKind>) -> LifecycleError {
        warn!(manager = ?interrupted, "Initialization cancelled, rolling back");
        let mut rollback_failures = Vec::new();
        if let Some(kind) = interrupted {
            if let Err(e) = self.manager_mut(kind).abort().await {
                rollback_failures.push(e);
            }
        }
        let (rolled_back, failures) = self.rollback().await;
        rollback_failures.extend(failures);
        self.set_state(ManagerState::Failed);
        LifecycleError::Cancelled {
            interrupted,
            rolled_back,
            rollback_failures,
        }
    }

    async fn unwind_abandoned(&mut self) -> Result<(), AggregatedTeardownError> {
        warn!(manager = ?self.in_flight, initialized = ?self.initialized, "Initialization was abandoned, rolling back");
        let mut failures = Vec::new();
        if let Some(kind) = self.in_flight.take() {
            if let Err(e) = self.manager_mut(kind).abort().await {
                failures.push(e);
            }
        }
        let (_, rollback_failures) = self.rollback().await;
        failures.extend(rollback_failures);
        self.set_state(ManagerState::Failed);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregatedTeardownError { failures })
        }
    }

    /// Cleans every initialized manager in reverse order, continuing past failures.
    async fn rollback(&mut self) -> (Vec<ManagerKind>, Vec<ManagerError>) {
        let mut rolled_back = Vec::new();
        let mut failures = Vec::new();
        for kind in std::mem::take(&mut self.initialized).into_iter().rev() {
            debug!(manager = %kind, "Rolling back");
            if let Err(e) = self.manager_mut(kind).clean().await {
                warn!(manager = %kind, error = %e, "Rollback cleanup failed");
                failures.push(e);
            }
            rolled_back.push(kind);
        }
        (rolled_back, failures)
    }

    /// Best-effort, idempotent teardown of every READY manager.
    ///
    /// If an `initialize` future was dropped before finishing, the lifecycle
    /// is still `INITIALIZING`; teardown then compensates it like a
    /// cancellation and leaves the lifecycle `FAILED`.
    pub async fn teardown(&mut self) -> Result<(), AggregatedTeardownError> {
        match self.state() {
            ManagerState::Ready => {}
            ManagerState::Initializing => return self.unwind_abandoned().await,
            state => {
                debug!(%state, "Teardown skipped");
                return Ok(());
            }
        }
        self.set_state(ManagerState::TearingDown);
        info!(managers = ?self.initialized, "Tearing down managers");

        let mut failures = Vec::new();
        for kind in std::mem::take(&mut self.initialized).into_iter().rev() {
            let manager = self.manager_mut(kind);
            if manager.state() != ManagerState::Ready {
                debug!(manager = %kind, state = %manager.state(), "Not ready, skipping");
                continue;
            }
            if let Err(e) = manager.clean().await {
                error!(manager = %kind, error = %e, "Manager failed to clean up");
                failures.push(e);
            }
        }

        self.set_state(ManagerState::Closed);
        if failures.is_empty() {
            info!("Teardown complete");
            Ok(())
        } else {
            Err(AggregatedTeardownError { failures })
        }
    }
}
