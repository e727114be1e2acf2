//! Handlers for `/reports` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/reports` | Names of the configured reports |
//! | `GET`  | `/reports/{name}/{format}` | `format` ∈ `json`/`csv`/`excel`/`html`; `?period=` and `?district=` filter |
//!
//! Both query parameters validate silently: a period outside the rolling
//! five-year window falls back to the current quarter, an unknown district
//! falls back to no filter.

use std::collections::HashSet;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::header,
  response::{IntoResponse, Response},
};
use chrono::{Datelike as _, NaiveDate, Utc};
use serde::Deserialize;

use afya_core::{period::Period, store::HmisStore};
use afya_report::{RenderedReport, run_report, write_csv, write_xlsx};

use crate::{AppState, error::{ApiError, store_err}};

// ─── Query validation ────────────────────────────────────────────────────────

/// Every period identifier accepted right now: all months, quarters and
/// years of the current year and the four before it.
fn allowed_periods(today: NaiveDate) -> HashSet<String> {
  let mut out = HashSet::new();
  for year in (today.year() - 4)..=today.year() {
    out.insert(Period::Year(year).iso());
    for quarter in 1..=4 {
      out.insert(Period::Quarter(year, quarter).iso());
    }
    for month in 1..=12 {
      out.insert(Period::Month(year, month).iso());
    }
  }
  out
}

fn current_quarter(today: NaiveDate) -> Period {
  Period::Quarter(today.year(), (today.month() + 2) / 3)
}

fn resolve_period(param: Option<&str>, today: NaiveDate) -> Period {
  param
    .and_then(Period::parse_iso)
    .filter(|p| allowed_periods(today).contains(&p.iso()))
    .unwrap_or_else(|| current_quarter(today))
}

async fn resolve_district<S>(
  store: &S,
  param: Option<&str>,
) -> Result<Option<String>, ApiError>
where
  S: HmisStore,
{
  let Some(requested) = param else {
    return Ok(None);
  };
  let districts = store.org_units_at_level(1).await.map_err(store_err)?;
  Ok(
    districts
      .into_iter()
      .find(|u| u.name.eq_ignore_ascii_case(requested))
      .map(|u| u.name),
  )
}

// ─── Handlers ────────────────────────────────────────────────────────────────

/// `GET /reports`
pub async fn list<S>(State(state): State<AppState<S>>) -> Json<Vec<String>>
where
  S: HmisStore,
{
  Json(state.reports.iter().map(|r| r.name.clone()).collect())
}

#[derive(Debug, Deserialize)]
pub struct RenderParams {
  pub period:   Option<String>,
  pub district: Option<String>,
}

fn slug(text: &str) -> String {
  text
    .to_lowercase()
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
    .collect()
}

fn attachment(
  report: &RenderedReport,
  extension: &str,
  content_type: &str,
  bytes: Vec<u8>,
) -> Response {
  let filename = format!(
    "{}_{}_{}.{extension}",
    slug(&report.title),
    slug(&report.level_label),
    report.period,
  );
  (
    [
      (header::CONTENT_TYPE, content_type.to_string()),
      (
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\""),
      ),
    ],
    bytes,
  )
    .into_response()
}

/// `GET /reports/{name}/{format}[?period=...][&district=...]`
pub async fn render<S>(
  State(state): State<AppState<S>>,
  Path((name, format)): Path<(String, String)>,
  Query(params): Query<RenderParams>,
) -> Result<Response, ApiError>
where
  S: HmisStore,
{
  let def = state
    .reports
    .iter()
    .find(|r| r.name.eq_ignore_ascii_case(&name))
    .ok_or_else(|| ApiError::NotFound(format!("report {name:?} not found")))?;

  let today = Utc::now().date_naive();
  let period = resolve_period(params.period.as_deref(), today);
  let district =
    resolve_district(state.store.as_ref(), params.district.as_deref()).await?;

  let report = run_report(
    state.store.as_ref(),
    def,
    period,
    district.as_deref(),
    &state.levels,
  )
  .await?;

  match format.as_str() {
    "json" => Ok(Json(report).into_response()),
    "csv" => {
      let bytes = write_csv(&report)?;
      Ok(attachment(&report, "csv", "text/csv", bytes))
    }
    "excel" | "xlsx" => {
      let bytes = write_xlsx(&report)?;
      Ok(attachment(
        &report,
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        bytes,
      ))
    }
    "html" => Err(ApiError::NotImplemented(
      "html rendering is served by the web frontend; use json".to_string(),
    )),
    other => Err(ApiError::BadRequest(format!(
      "unknown report format {other:?}"
    ))),
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
  }

  #[test]
  fn valid_period_inside_window_passes() {
    assert_eq!(
      resolve_period(Some("2024-Q1"), today()),
      Period::Quarter(2024, 1)
    );
    assert_eq!(resolve_period(Some("2022-07"), today()), Period::Month(2022, 7));
  }

  #[test]
  fn stale_or_garbage_periods_default_to_current_quarter() {
    let q3 = Period::Quarter(2026, 3);
    assert_eq!(resolve_period(Some("2016-Q4"), today()), q3);
    assert_eq!(resolve_period(Some("soon"), today()), q3);
    assert_eq!(resolve_period(None, today()), q3);
  }

  #[test]
  fn window_spans_five_years() {
    let allowed = allowed_periods(today());
    assert!(allowed.contains("2022"));
    assert!(!allowed.contains("2021"));
    assert!(allowed.contains("2026-12"));
  }

  #[test]
  fn slugs_are_filename_safe() {
    assert_eq!(slug("District Scorecard (draft)"), "district_scorecard__draft_");
  }
}
