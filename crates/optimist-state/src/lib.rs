//! Optimist State Engine - optimistic container and rollback
//!
//! This crate implements the pure half of the optimistic-update manager:
//! - Container state (save point, replay queue, current value)
//! - Commit primitives (optimistic, normal, rollback-and-settle)
//! - Rollback engine (queue replay without one transaction)

pub mod state;
pub mod rollback;
pub mod commit;

pub use state::*;
pub use rollback::*;
pub use commit::*;
