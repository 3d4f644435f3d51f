//! # Lifecycle States
//!
//! Every manager (and the application as a whole) moves through the same
//! state machine:
//!
//! ```text
//! UNINITIALIZED -> INITIALIZING -> READY -> TEARING_DOWN -> CLOSED
//!                       |            |
//!                       +-> FAILED <-+
//! ```
//!
//! `CLOSED` and `FAILED` are terminal. [`StateCell`] is the only place that
//! mutates a state, so illegal jumps are rejected in one spot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one of the three service managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagerKind {
    Health,
    Tracer,
    Metrics,
}

impl ManagerKind {
    /// Fixed initialization precedence: health, then tracer, then metrics.
    pub const ORDER: [ManagerKind; 3] = [ManagerKind::Health, ManagerKind::Tracer, ManagerKind::Metrics];

    pub fn name(&self) -> &'static str {
        match self {
            ManagerKind::Health => "HealthManager",
            ManagerKind::Tracer => "TracerManager",
            ManagerKind::Metrics => "MetricsManager",
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    TearingDown,
    Closed,
    Failed,
}

impl ManagerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ManagerState::Closed | ManagerState::Failed)
    }

    pub fn can_transition_to(&self, next: ManagerState) -> bool {
        use ManagerState::{Closed, Failed, Initializing, Ready, TearingDown, Uninitialized};
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Ready, TearingDown)
                | (Ready, Failed)
                | (TearingDown, Closed)
        )
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerState::Uninitialized => "UNINITIALIZED",
            ManagerState::Initializing => "INITIALIZING",
            ManagerState::Ready => "READY",
            ManagerState::TearingDown => "TEARING_DOWN",
            ManagerState::Closed => "CLOSED",
            ManagerState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ManagerState,
    pub to: ManagerState,
}

/// Guarded holder for a [`ManagerState`].
#[derive(Debug, Clone, Copy)]
pub struct StateCell {
    current: ManagerState,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            current: ManagerState::Uninitialized,
        }
    }

    pub fn get(&self) -> ManagerState {
        self.current
    }

    pub fn advance(&mut self, next: ManagerState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = next;
        Ok(())
    }
}

/// Read-only view of a manager, consumed by the console report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub kind: ManagerKind,
    pub state: ManagerState,
    pub services: Vec<String>,
}
