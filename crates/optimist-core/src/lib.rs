//! Optimist Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout Optimist:
//! - Transaction identifiers and allocators
//! - State transforms and updates
//! - The error type shared by every crate

pub mod id;
pub mod transform;
pub mod error;

pub use id::*;
pub use transform::*;
pub use error::*;
