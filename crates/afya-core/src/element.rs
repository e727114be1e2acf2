//! Data elements (indicators) and their demographic disaggregations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Data element ────────────────────────────────────────────────────────────

/// How facts for an element combine across org units and periods.
/// Only summation is supported; the variant exists so the column in the
/// database stays honest about what was done.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
  #[default]
  Sum,
}

/// The value domain an element's facts are expected to fall in.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
  #[default]
  Number,
  Percentage,
}

/// An indicator definition. Names and aliases are globally unique
/// case-insensitively *against each other* — no element's name may equal
/// another's alias and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
  pub id:                 i64,
  pub name:               String,
  pub alias:              Option<String>,
  pub value_type:         ValueType,
  pub value_min:          Option<Decimal>,
  pub value_max:          Option<Decimal>,
  pub aggregation_method: AggregationMethod,
}

/// Input for element creation; `id` is assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataElement {
  pub name:               String,
  pub alias:              Option<String>,
  #[serde(default)]
  pub value_type:         ValueType,
  pub value_min:          Option<Decimal>,
  pub value_max:          Option<Decimal>,
  #[serde(default)]
  pub aggregation_method: AggregationMethod,
}

impl NewDataElement {
  /// A bare named element with defaults everywhere else — the shape created
  /// on demand when an imported column header is first seen.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name:               name.into(),
      alias:              None,
      value_type:         ValueType::default(),
      value_min:          None,
      value_max:          None,
      aggregation_method: AggregationMethod::default(),
    }
  }
}

/// Gate for names that will be embedded into dynamically generated SQL
/// (pivot column cases, validation-rule views). Rejecting metacharacters at
/// the write boundary is what makes the later string composition safe.
pub fn check_sql_safe(name: &str) -> Result<()> {
  let name = name.trim();
  if name.is_empty() {
    return Err(Error::UnsafeName(name.to_string()));
  }
  let bad = |c: char| {
    c == '\'' || c == '"' || c == ';' || c == '`' || c == '\\' || c.is_control()
  };
  if name.chars().any(bad) {
    return Err(Error::UnsafeName(name.to_string()));
  }
  Ok(())
}

// ─── Categories ──────────────────────────────────────────────────────────────

/// A single disaggregation dimension value, e.g. "Male" or "15-19 Years".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub id:   i64,
  pub name: String,
}

/// An ordered, deduplicated set of categories with a canonical composite
/// name. The same category set always maps to the same combo row; combo id
/// 1 is the pre-seeded "no disaggregation" default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCombo {
  pub id:   i64,
  pub name: String,
}

/// The id and name of the pre-seeded empty combo.
pub const DEFAULT_COMBO_ID: i64 = 1;
pub const DEFAULT_COMBO_NAME: &str = "(default)";

/// Canonical combo name for a set of category names: sorted, deduplicated,
/// joined with ", " and parenthesized. Order-insensitive and pure, so it
/// doubles as the get-or-create key.
pub fn combo_name(names: &[String]) -> String {
  let mut sorted: Vec<&str> = names.iter().map(|n| n.trim()).collect();
  sorted.sort_unstable();
  sorted.dedup();
  if sorted.is_empty() {
    return DEFAULT_COMBO_NAME.to_string();
  }
  format!("({})", sorted.join(", "))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn combo_name_is_order_insensitive() {
    let ab = combo_name(&["Male".into(), "15-19 Years".into()]);
    let ba = combo_name(&["15-19 Years".into(), "Male".into()]);
    assert_eq!(ab, ba);
    assert_eq!(ab, "(15-19 Years, Male)");
  }

  #[test]
  fn combo_name_deduplicates() {
    assert_eq!(combo_name(&["Male".into(), "Male".into()]), "(Male)");
  }

  #[test]
  fn combo_name_empty_is_default() {
    assert_eq!(combo_name(&[]), DEFAULT_COMBO_NAME);
  }

  #[test]
  fn sql_safe_gate() {
    assert!(check_sql_safe("105-1 OPD Attendance").is_ok());
    assert!(check_sql_safe("ART (Active)").is_ok());
    assert!(check_sql_safe("bad'; DROP TABLE--").is_err());
    assert!(check_sql_safe("double\"quote").is_err());
    assert!(check_sql_safe("   ").is_err());
  }
}
