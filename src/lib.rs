//! `depscan` — discover, build and analyze modules across build ecosystems
//! into one dependency graph per module.
//!
//! # Layout
//! - [`module`]: module types and aliases, module descriptors, package
//!   identities and analysis results.
//! - [`analyzer`]: the analyzer contract, its capabilities and the registry
//!   that resolves a [`module::Type`] to an adapter.
//! - [`detector`]: module discovery across every registered adapter.
//! - [`pipeline`]: the concurrent build-then-analyze run over many modules.
//! - [`config`]: `.depscan/config.toml` loading.
//! - [`exec`]: subprocess execution behind a fakeable trait.
//! - [`report`]: terminal and JSON rendering of outcomes.

pub mod analyzer;
pub mod config;
pub mod detector;
pub mod error;
pub mod exec;
pub mod module;
pub mod pipeline;
pub mod report;

pub use error::{Error, ErrorKind, Result};
