//! Coordination core: shared state and the master coordinator

pub mod master;
pub mod state;

pub use master::{CoordinatorState, GlobalStatus, MasterCoordinator, StartReport, StopReport};
pub use state::{BoundedHistory, CoordinationMetrics, GlobalState, SharedState, StateSnapshot, SystemState};
