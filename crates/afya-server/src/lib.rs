//! JSON REST API and server binary for Afya.
//!
//! Exposes an axum [`Router`] backed by any [`afya_core::store::HmisStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", afya_server::api_router(state))
//! ```

pub mod config;
pub mod error;
pub mod reports;
pub mod rules;

use std::sync::Arc;

use afya_core::{orgunit::LevelNames, store::HmisStore};
use afya_report::ReportDef;
use axum::{Router, routing::get};

pub use config::ServerConfig;
pub use error::ApiError;

/// Shared handler state: the store plus the report definitions and level
/// names loaded at startup.
#[derive(Debug)]
pub struct AppState<S> {
  pub store:   Arc<S>,
  pub reports: Arc<Vec<ReportDef>>,
  pub levels:  Arc<LevelNames>,
}

// Derived Clone would bound S: Clone; the Arcs make that unnecessary.
impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      reports: Arc::clone(&self.reports),
      levels:  Arc::clone(&self.levels),
    }
  }
}

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: HmisStore + 'static,
{
  Router::new()
    // Reports
    .route("/reports", get(reports::list::<S>))
    .route("/reports/{name}/{format}", get(reports::render::<S>))
    // Validation rules
    .route(
      "/validation-rules",
      get(rules::list::<S>).post(rules::save::<S>),
    )
    .route("/validation-rules/{id}/run", get(rules::run::<S>))
    .with_state(state)
}
