//! Validation rules — named arithmetic comparisons between indicator
//! expressions, materialised by the storage backend as database views.

use serde::{Deserialize, Serialize};

/// The comparison operator between the two expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = "=")]
  Eq,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = ">")]
  Gt,
}

impl Comparator {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim() {
      "<" => Some(Self::Lt),
      "<=" => Some(Self::Le),
      "=" | "==" => Some(Self::Eq),
      ">=" => Some(Self::Ge),
      ">" => Some(Self::Gt),
      _ => None,
    }
  }

  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Lt => "<",
      Self::Le => "<=",
      Self::Eq => "=",
      Self::Ge => ">=",
      Self::Gt => ">",
    }
  }
}

/// A saved rule. `resolved` reports whether the last save managed to match
/// every token of both expressions against known indicators; unresolved
/// rules keep their previous view (if any) and element set — a
/// user-correctable state, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
  pub id:               i64,
  pub name:             String,
  pub left_expr:        String,
  pub comparator:       Comparator,
  pub right_expr:       String,
  pub resolved:         bool,
  /// Ids of the elements the expressions were found to reference, kept in
  /// sync on every successful resolution.
  pub data_element_ids: Vec<i64>,
}

/// Input to [`crate::store::HmisStore::save_validation_rule`]. Saving an
/// existing `name` replaces that rule's expressions and re-materialises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewValidationRule {
  pub name:       String,
  pub left_expr:  String,
  pub comparator: Comparator,
  pub right_expr: String,
}

/// Name of the backing view for a rule, queryable directly over SQL.
pub fn view_name(rule_id: i64) -> String {
  format!("vw_validation_{rule_id}")
}
