//! repodoc library crate.
//!
//! Accepts source repository URLs, runs each through a
//! clone → parse → analyze → package → upload pipeline on background workers,
//! and serves job status and download links over HTTP.

pub mod analysis;
pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
