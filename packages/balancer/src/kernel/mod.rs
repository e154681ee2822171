// Kernel - infrastructure seams with dependency injection
//
// The kernel holds the external-service adapters (state store, orchestrator
// API) behind traits so domain code and tests never touch transports
// directly.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in domain layers.

pub mod orchestrator;
pub mod store;
pub mod testing;

pub use orchestrator::{KubeOrchestrator, Orchestrator};
pub use store::{RedisStore, StateStore, StoreError};
