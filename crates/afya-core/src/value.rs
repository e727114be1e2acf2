//! Data values — the fact table rows — and source-document provenance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{element::DEFAULT_COMBO_ID, period::Period};

/// One fact: an element's numeric value for one org unit and one period,
/// optionally disaggregated by a category combo. Exactly one of the three
/// period identifiers is populated, chosen by the period's precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValue {
  pub id:                 i64,
  pub data_element_id:    i64,
  pub category_combo_id:  i64,
  pub org_unit_id:        i64,
  /// Free-text location breadcrumb as it appeared in the source sheet.
  pub site_str:           String,
  pub numeric_value:      Decimal,
  pub year:               Option<String>,
  pub quarter:            Option<String>,
  pub month:              Option<String>,
  pub source_document_id: Option<i64>,
}

/// Input to [`crate::store::HmisStore::upsert_value`]. The period enum is
/// split into the three identifier columns by the store.
#[derive(Debug, Clone)]
pub struct NewDataValue {
  pub data_element_id:    i64,
  pub category_combo_id:  i64,
  pub org_unit_id:        i64,
  pub site_str:           String,
  pub numeric_value:      Decimal,
  pub period:             Period,
  pub source_document_id: Option<i64>,
}

impl NewDataValue {
  pub fn new(
    data_element_id: i64,
    org_unit_id: i64,
    period: Period,
    numeric_value: Decimal,
  ) -> Self {
    Self {
      data_element_id,
      category_combo_id: DEFAULT_COMBO_ID,
      org_unit_id,
      site_str: String::new(),
      numeric_value,
      period,
      source_document_id: None,
    }
  }
}

/// An uploaded spreadsheet. Purely a provenance anchor for the values it
/// produced; the stored filename is randomized to avoid collisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
  pub id:            i64,
  pub original_name: String,
  pub stored_name:   String,
  pub uploaded_at:   chrono::DateTime<chrono::Utc>,
}
