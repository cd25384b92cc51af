//! Service layer module.
//!
//! Wires configuration into the running services and owns their lifecycle.

pub mod container;

pub use container::ServiceContainer;
