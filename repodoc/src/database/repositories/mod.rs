//! Repository layer for database access.
//!
//! Each repository is an `async_trait` interface with an sqlx implementation,
//! so the pipeline can be exercised against in-memory stand-ins.

pub mod job;
pub mod task;

pub use job::*;
pub use task::*;
