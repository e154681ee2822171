//! Executor placement: the decision engine, counter tracking, and
//! ground-truth reconciliation.

pub mod engine;
pub mod models;
pub mod reconciler;
pub mod tracker;

pub use models::{CapacityType, Decision, ExecutorCount};
pub use reconciler::Reconciler;
pub use tracker::PlacementTracker;
