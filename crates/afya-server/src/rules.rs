//! Handlers for `/validation-rules` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/validation-rules` | All saved rules |
//! | `POST` | `/validation-rules` | Save (insert or replace by name) a rule |
//! | `GET`  | `/validation-rules/{id}/run` | Rows from the rule's view; `?period=` restricts |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;

use afya_core::{
  period::Period,
  store::{HmisStore, ViewRow},
  validation::{NewValidationRule, ValidationRule},
};

use crate::{AppState, error::{ApiError, store_err}};

/// `GET /validation-rules`
pub async fn list<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<Vec<ValidationRule>>, ApiError>
where
  S: HmisStore,
{
  let rules =
    state.store.list_validation_rules().await.map_err(store_err)?;
  Ok(Json(rules))
}

/// `POST /validation-rules`
///
/// An unresolvable expression is not an error: the rule is stored with
/// `resolved: false` and can be corrected by posting again under the same
/// name.
pub async fn save<S>(
  State(state): State<AppState<S>>,
  Json(input): Json<NewValidationRule>,
) -> Result<Json<ValidationRule>, ApiError>
where
  S: HmisStore,
{
  if input.name.trim().is_empty() {
    return Err(ApiError::BadRequest("rule name must not be empty".into()));
  }
  let rule = state
    .store
    .save_validation_rule(input)
    .await
    .map_err(store_err)?;
  Ok(Json(rule))
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
  pub period: Option<String>,
}

/// `GET /validation-rules/{id}/run[?period=...]`
pub async fn run<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
  Query(params): Query<RunParams>,
) -> Result<Json<Vec<ViewRow>>, ApiError>
where
  S: HmisStore,
{
  let rules =
    state.store.list_validation_rules().await.map_err(store_err)?;
  if !rules.iter().any(|r| r.id == id) {
    return Err(ApiError::NotFound(format!("validation rule {id} not found")));
  }

  let periods = match params.period.as_deref() {
    Some(text) => {
      let period = Period::parse_iso(text).ok_or_else(|| {
        ApiError::BadRequest(format!("unparseable period {text:?}"))
      })?;
      vec![period]
    }
    None => Vec::new(),
  };

  let rows = state
    .store
    .run_validation_rule(id, &periods)
    .await
    .map_err(store_err)?;
  Ok(Json(rows))
}
