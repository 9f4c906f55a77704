//! Optimist Runtime - workflow consumer, store and dispatch
//!
//! This crate drives optimistic transactions against a container:
//! 1. Allocate a transaction id
//! 2. Run the workflow to its first suspension
//! 3. Commit the optimistic guess
//! 4. Await the pending result
//! 5. Roll back the guess and settle with the authoritative transform
//!
//! `Store` is the commit point, `Dispatcher` maps payloads to hints, and
//! `OptimisticState` / `OptimisticTask` wrap the common single-value cases.

pub mod workflow;
pub mod config;
pub mod telemetry;
pub mod consumer;
pub mod store;
pub mod dispatch;
pub mod handles;

pub use workflow::*;
pub use config::*;
pub use telemetry::*;
pub use consumer::*;
pub use store::*;
pub use dispatch::*;
pub use handles::*;
