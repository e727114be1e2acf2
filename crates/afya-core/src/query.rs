//! The what/where/when query description.
//!
//! A [`DataQuery`] names indicators, scopes org units, and restricts
//! periods; the storage backend translates it into filtered, annotated
//! fact rows. The three clauses chain in any order and compose by
//! intersection; within one clause, arguments union.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::period::Period;

/// An org-unit scope argument: an already-resolved id or a name to resolve
/// case-insensitively. Names that resolve to nothing simply drop out; if
/// the whole clause resolves to nothing the query returns no rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgUnitRef {
  Id(i64),
  Name(String),
}

impl From<i64> for OrgUnitRef {
  fn from(id: i64) -> Self {
    Self::Id(id)
  }
}

impl From<&str> for OrgUnitRef {
  fn from(name: &str) -> Self {
    Self::Name(name.to_string())
  }
}

impl From<String> for OrgUnitRef {
  fn from(name: String) -> Self {
    Self::Name(name)
  }
}

/// Chainable description of a fact query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
  /// Indicator names or aliases, matched case-insensitively.
  pub elements:  Vec<String>,
  /// Org-unit subtrees; empty means "everywhere".
  pub org_units: Vec<OrgUnitRef>,
  /// Periods; empty means "all time". Each period filters its own
  /// granularity's column.
  pub periods:   Vec<Period>,
}

impl DataQuery {
  pub fn new() -> Self {
    Self::default()
  }

  /// Restrict to facts whose element name *or alias* equals any of `names`.
  pub fn what<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.elements.extend(names.into_iter().map(Into::into));
    self
  }

  /// Restrict to facts inside any of the given org-unit subtrees.
  pub fn where_units<I, U>(mut self, units: I) -> Self
  where
    I: IntoIterator<Item = U>,
    U: Into<OrgUnitRef>,
  {
    self.org_units.extend(units.into_iter().map(Into::into));
    self
  }

  /// Restrict to the given periods. Strings are parsed with the canonical
  /// grammar (`YYYY-MM`, `YYYYQn`, `YYYY-Qn`, `YYYY`); unparseable strings
  /// are dropped.
  pub fn when<I, S>(mut self, periods: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .periods
      .extend(periods.into_iter().filter_map(|s| Period::parse_iso(s.as_ref())));
    self
  }

  pub fn when_periods(mut self, periods: impl IntoIterator<Item = Period>) -> Self {
    self.periods.extend(periods);
    self
  }
}

/// One annotated fact row returned by
/// [`crate::store::HmisStore::query_values`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRow {
  /// Canonical element name (the element's `name`, even when matched by
  /// alias).
  pub de_name:     String,
  /// Category-combo composite name; `"(default)"` when undisaggregated.
  pub category:    String,
  pub org_unit_id: i64,
  /// Org-unit names from the root down to the fact's own unit.
  pub path:        Vec<String>,
  /// Canonical period identifier at the fact's own granularity.
  pub period:      String,
  pub value:       Decimal,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clauses_chain_and_accumulate() {
    let q = DataQuery::new()
      .what(["OPD Attendance"])
      .where_units(["Kampala", "Gulu"])
      .when(["2016-Q4", "2016"]);

    assert_eq!(q.elements, vec!["OPD Attendance"]);
    assert_eq!(q.org_units.len(), 2);
    assert_eq!(
      q.periods,
      vec![Period::Quarter(2016, 4), Period::Year(2016)]
    );
  }

  #[test]
  fn when_drops_unparseable_strings() {
    let q = DataQuery::new().when(["2016-Q4", "last tuesday"]);
    assert_eq!(q.periods, vec![Period::Quarter(2016, 4)]);
  }

  #[test]
  fn when_rejects_loose_month_names() {
    // The query grammar is the canonical one; "Oct 2016" belongs to the
    // spreadsheet import grammar only.
    let q = DataQuery::new().when(["Oct 2016"]);
    assert!(q.periods.is_empty());
  }
}
