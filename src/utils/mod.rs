//! Shared utilities: error types and logging bootstrap.

pub mod error;
pub mod logging;
