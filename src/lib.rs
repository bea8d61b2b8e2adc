//! Embeddable action runtime: action graphs of tasks and guarded links, an expression
//! language with a pluggable function registry, typed attribute mapping and an admission
//! layer that runs actions inline or on a bounded worker pool.

pub mod core;
pub mod logging;

/// Current crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, anyhow::Error>;
