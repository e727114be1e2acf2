//! The `HmisStore` trait — the seam between the domain and a storage
//! backend.
//!
//! Implemented by `afya-store-sqlite`; higher layers (import, reports, the
//! HTTP surface) depend on this abstraction, not on any concrete backend.

use std::future::Future;

use serde_json::Map;

use crate::{
  element::{CategoryCombo, DataElement, NewDataElement},
  orgunit::OrgUnit,
  period::{Granularity, Period},
  query::{DataQuery, QueryRow},
  validation::{NewValidationRule, ValidationRule},
  value::{NewDataValue, SourceDocument},
};

/// Where an element's facts actually live: the shallowest org-unit level
/// any fact was recorded at, and the coarsest period granularity used.
/// The aggregate/pivot SQL builder rectangularises heterogeneous elements
/// onto one common grid using exactly this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMeta {
  pub id:              i64,
  pub name:            String,
  pub alias:           Option<String>,
  pub own_level:       u32,
  pub own_granularity: Granularity,
}

/// One row read back from a validation-rule view: dynamic `de_<id>`
/// columns plus `de_calc_1`, keyed by column name.
pub type ViewRow = Map<String, serde_json::Value>;

/// Abstraction over an Afya storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait HmisStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Org units ─────────────────────────────────────────────────────────

  /// Walk `segments` from the root, normalising each segment and
  /// get-or-creating nodes top-down with case-insensitive sibling matching.
  /// Memoized; the cache is invalidated by [`Self::delete_org_unit`].
  fn lookup_or_create_path<'a>(
    &'a self,
    segments: &'a [String],
  ) -> impl Future<Output = Result<OrgUnit, Self::Error>> + Send + 'a;

  fn org_unit(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<OrgUnit>, Self::Error>> + Send + '_;

  /// Case-insensitive lookup by bare name, anywhere in the tree.
  fn org_unit_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<OrgUnit>, Self::Error>> + Send + 'a;

  /// All org units at a given depth, name-ordered (level 1 = the district
  /// list).
  fn org_units_at_level(
    &self,
    level: u32,
  ) -> impl Future<Output = Result<Vec<OrgUnit>, Self::Error>> + Send + '_;

  /// Delete a node and its whole subtree (cascading its facts), then clear
  /// the memoized path cache so cache and storage cannot diverge.
  fn delete_org_unit(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Elements and combos ───────────────────────────────────────────────

  /// Find an element by name or alias, case-insensitively.
  fn find_element<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<DataElement>, Self::Error>> + Send + 'a;

  /// Create an element, enforcing the cross-field name/alias uniqueness
  /// invariant and the SQL-safe name gate.
  fn create_element(
    &self,
    input: NewDataElement,
  ) -> impl Future<Output = Result<DataElement, Self::Error>> + Send + '_;

  /// Get-or-create by name — the import path for first-seen column headers.
  fn ensure_element<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<DataElement, Self::Error>> + Send + 'a;

  /// Get-or-create the combo for a category name set (order-insensitive).
  fn ensure_combo<'a>(
    &'a self,
    categories: &'a [String],
  ) -> impl Future<Output = Result<CategoryCombo, Self::Error>> + Send + 'a;

  // ── Facts ─────────────────────────────────────────────────────────────

  /// Insert-or-update one fact. The conflict target is the partial unique
  /// index matching the period's granularity; on conflict the numeric
  /// value and provenance are overwritten (last write wins).
  fn upsert_value(
    &self,
    value: NewDataValue,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Execute a what/where/when query, returning annotated fact rows.
  fn query_values<'a>(
    &'a self,
    query: &'a DataQuery,
  ) -> impl Future<Output = Result<Vec<QueryRow>, Self::Error>> + Send + 'a;

  /// Derive [`ElementMeta`] for the named elements from their recorded
  /// facts. Elements with no facts default to the deepest level seen in
  /// the tree and monthly granularity.
  fn element_metadata<'a>(
    &'a self,
    names: &'a [String],
  ) -> impl Future<Output = Result<Vec<ElementMeta>, Self::Error>> + Send + 'a;

  // ── Documents ─────────────────────────────────────────────────────────

  /// Register an uploaded workbook, randomizing the stored filename.
  fn register_document<'a>(
    &'a self,
    original_name: &'a str,
  ) -> impl Future<Output = Result<SourceDocument, Self::Error>> + Send + 'a;

  // ── Validation rules ──────────────────────────────────────────────────

  /// Save (insert or replace by name) and attempt to materialise a rule.
  /// Never fails on an unresolvable expression — the returned rule simply
  /// reports `resolved: false`.
  fn save_validation_rule(
    &self,
    input: NewValidationRule,
  ) -> impl Future<Output = Result<ValidationRule, Self::Error>> + Send + '_;

  fn list_validation_rules(
    &self,
  ) -> impl Future<Output = Result<Vec<ValidationRule>, Self::Error>> + Send + '_;

  /// Query a rule's backing view, restricted to `periods` (empty = all).
  fn run_validation_rule<'a>(
    &'a self,
    rule_id: i64,
    periods: &'a [Period],
  ) -> impl Future<Output = Result<Vec<ViewRow>, Self::Error>> + Send + 'a;
}
