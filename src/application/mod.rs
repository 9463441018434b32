//! Application services: admission, build orchestration and artifact publishing.

pub mod admission;
pub mod artifacts;
pub mod build;
pub mod compile;
pub mod error;
pub mod publish;
pub mod retrieve;
