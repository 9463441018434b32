//! Domain layer types and invariants.

pub mod build;
pub mod error;
