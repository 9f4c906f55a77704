//! Optimist Test Harness - controllable futures, scenarios and fuzzing
//!
//! This crate provides:
//! - Gates: futures resolved or rejected on demand
//! - Gated stores for hand-settled end-to-end scenarios
//! - A seeded scenario fuzzer checked against a reference fold

pub mod gate;
pub mod scenario;
pub mod fuzzer;

pub use gate::*;
pub use scenario::*;
pub use fuzzer::*;
