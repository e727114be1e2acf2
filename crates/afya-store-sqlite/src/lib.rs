//! SQLite backend for the Afya HMIS store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Besides the plain
//! [`afya_core::store::HmisStore`] operations this crate houses the two
//! dynamic-SQL subsystems: the aggregate/pivot/calculation builder
//! ([`sqlgen`]) and the validation-rule expression compiler.

mod hierarchy;
mod schema;
mod store;
mod validation;

pub mod error;
pub mod sqlgen;

pub use error::{Error, Result};
pub use store::SqliteStore;
