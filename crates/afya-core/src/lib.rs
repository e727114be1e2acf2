//! Core types and trait definitions for the Afya HMIS reporting engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

pub mod element;
pub mod error;
pub mod orgunit;
pub mod period;
pub mod query;
pub mod raster;
pub mod store;
pub mod validation;
pub mod value;

pub use error::{Error, Result};
