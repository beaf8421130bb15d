//! Mesh storage: replicated setup, load balancing, per-rank distribution,
//! and repartitioning.

pub mod balancing;
pub mod distributed;
pub mod migration;
pub mod setup;

pub use distributed::DistributedStorage;
pub use migration::migrate;
pub use setup::SetupStorage;
