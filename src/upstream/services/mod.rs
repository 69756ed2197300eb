//! Orchestration services for upstream servers.
//!
//! Services drive connections, apply the failure policy and coordinate
//! writes across every store through the ports.

mod connection;
mod persistence;
mod policy;
mod supervisor;

#[cfg(test)]
mod test_support;

pub use connection::{ConnectOutcome, ConnectionStateMachine};
pub use persistence::{
    ApplyReport, CoordinatorError, CoordinatorResult, Mutation, PersistenceCoordinator,
    PersistenceFailure, ReconcileReport, RemovalReport, StoreKind,
};
pub use policy::{
    AutoDisablePolicy, PolicyDecision, PolicyError, PolicyResult, RecoveryOutcome, ToggleOutcome,
    decide,
};
pub use supervisor::ConnectionSupervisor;
