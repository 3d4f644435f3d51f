//! # AppLaunch
//!
//! > **Lifecycle orchestration for network-service processes.**
//!
//! This crate decides *when* and *in what order* the supporting subsystems of
//! a service are armed, checked and disarmed: health probes, tracing
//! exporters and metrics exporters. It does not implement tracing, metrics or
//! HTTP itself; those are external collaborators reached through narrow
//! capability traits.
//!
//! ## Core Concepts
//!
//! ### Capabilities, not duck typing
//! A [`Service`](service::Service) declares which of the three capabilities
//! it implements. Each manager accepts only services declaring its
//! capability, and each capability has its own hooks, so a service that
//! is both a health check and a tracer is never initialized twice for the
//! same concern.
//!
//! ### Generic registry, written once
//! All three managers share one internal `ManagedServices<S>` for ordered,
//! name-unique registration, all-or-nothing initialization and reverse-order
//! cleanup. The managers only add what is specific to them.
//!
//! ### Late binding
//! Hooks receive an [`InitContext`](service::InitContext) (config plus the
//! served application handle) when they are initialized, not when they are
//! constructed.
//!
//! ### No globals
//! Every manager is owned by an [`ApplicationManager`](application::ApplicationManager).
//! Mutation takes `&mut self` and queries take `&self`, so two managers can
//! never touch the served application at the same time.
//!
//! ## Module Tour
//!
//! | Layer | Modules | Key items |
//! |---|---|---|
//! | Façade | [`application`] | `ApplicationManager`, `Startup` |
//! | Coordination | [`lifecycle`] | `LifeCycleManager`, `InitFlags`, `Manager` |
//! | Managers | [`health`], [`tracer`], [`metrics`] | `HealthManager`, `TracerManager`, `MetricsManager` |
//! | Reporting | [`table`] | `TableManager` |
//! | Contracts | [`service`], [`state`], [`error`], [`config`] | `Service`, `ManagerState`, `ServiceConfig` |
//! | Extras | [`probes`], [`logging`], [`mock`] | `TcpProbe`, `setup_tracing`, `MockService` |
//!
//! ## Lifecycle at a Glance
//!
//! ```text
//! add_service ──► initialize_application ──► run / check_health ──► shutdown
//!                  health → tracer → metrics                        metrics → tracer → health
//!                  (any failure: roll back, nothing left READY)     (best-effort, idempotent)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the demo responder with debug logs
//! APP_SERVICE_NAME=demo APP_DEBUG=true cargo run
//!
//! cargo test
//! ```

pub mod application;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod mock;
pub mod probes;
pub(crate) mod registry;
pub mod service;
pub mod state;
pub mod table;
pub mod tracer;

pub use application::{ApplicationManager, Startup};
pub use config::{ServiceConfig, ServiceEnv};
pub use error::{ApplicationError, ServiceError};
pub use health::{HealthCheckResult, HealthStatus};
pub use lifecycle::InitFlags;
pub use service::{HealthCheckable, MetricsService, Service, ServedApp, TracerService};
