//! Core types and trait definitions for the Neta enrichment pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod donation;
pub mod error;
pub mod field;
pub mod reconcile;
pub mod report;
pub mod source;
pub mod store;
pub mod subject;

pub use error::{Error, Result};
