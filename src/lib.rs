//! texforge: compile LaTeX sources to PDF and serve the results from S3-compatible storage.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
