//! The scorecard runner: declarative report definitions executed as
//! "group → fetch → rasterize → derive" against any store, producing a
//! rendered grid the serializers and the HTTP layer consume.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use afya_core::{
  element::DEFAULT_COMBO_NAME,
  orgunit::LevelNames,
  period::{Granularity, Period},
  query::DataQuery,
  raster::rasterize,
  store::HmisStore,
};

use crate::{Result, error::store_err, legend::LegendSet};

// ─── Definitions ─────────────────────────────────────────────────────────────

/// A block of indicators fetched together and laid out side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorGroup {
  #[serde(default)]
  pub title:    Option<String>,
  pub elements: Vec<String>,
}

/// A derived column: `numerator / denominator * scale`, NULL whenever the
/// denominator is missing or zero. Operands name indicators (or aliases)
/// and are resolved by keyed lookup against the rendered columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcDef {
  pub label:       String,
  pub numerator:   String,
  pub denominator: String,
  #[serde(default = "default_scale")]
  pub scale:       u32,
}

fn default_scale() -> u32 {
  100
}

/// One declarative scorecard: which level forms the rows, which indicator
/// groups form the columns, which ratios get derived, and how the result
/// is colour-banded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDef {
  pub name:         String,
  pub org_level:    u32,
  #[serde(default)]
  pub groups:       Vec<IndicatorGroup>,
  #[serde(default)]
  pub calculations: Vec<CalcDef>,
  #[serde(default)]
  pub legend_sets:  Vec<LegendSet>,
}

// ─── Rendered output ─────────────────────────────────────────────────────────

/// One data-column label: indicator plus optional category, or a derived
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLabel {
  pub element:    String,
  pub category:   Option<String>,
  pub calculated: bool,
}

impl ColumnLabel {
  /// Header text; categorised columns stack the category on a second line.
  pub fn text(&self) -> String {
    match &self.category {
      Some(category) => format!("{}\n{category}", self.element),
      None => self.element.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
  pub org_unit: String,
  pub values:   Vec<Option<Decimal>>,
}

/// The dense grid a report run produces, ready for any serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
  pub title:       String,
  /// Semantic label of the row level, e.g. "District".
  pub level_label: String,
  /// Canonical identifier of the period rendered.
  pub period:      String,
  pub columns:     Vec<ColumnLabel>,
  pub rows:        Vec<ReportRow>,
  pub legend_sets: Vec<LegendSet>,
}

// ─── Runner ──────────────────────────────────────────────────────────────────

/// The requested period plus every finer period inside it, so facts
/// recorded monthly still roll up into a quarterly or annual scorecard.
fn expand_period(period: Period) -> Vec<Period> {
  match period {
    Period::Month(..) => vec![period],
    Period::Quarter(year, quarter) => {
      let mut out = vec![period];
      let first_month = (quarter - 1) * 3 + 1;
      out.extend((first_month..first_month + 3).map(|m| Period::Month(year, m)));
      out
    }
    Period::Year(year) => {
      let mut out = vec![period];
      out.extend((1..=4).map(|q| Period::Quarter(year, q)));
      out.extend((1..=12).map(|m| Period::Month(year, m)));
      out
    }
  }
}

/// Execute `def` for one period, optionally scoped to a district subtree.
pub async fn run_report<S: HmisStore>(
  store: &S,
  def: &ReportDef,
  period: Period,
  district: Option<&str>,
  level_names: &LevelNames,
) -> Result<RenderedReport> {
  // Row keys: the org units at the report's level, optionally narrowed to
  // the requested district's subtree.
  let mut units = store
    .org_units_at_level(def.org_level)
    .await
    .map_err(store_err)?;
  if let Some(district) = district {
    match store.org_unit_by_name(district).await.map_err(store_err)? {
      Some(scope) => units.retain(|u| scope.contains(u)),
      None => units.clear(),
    }
  }
  let row_keys: Vec<String> = units.into_iter().map(|u| u.name).collect();

  let periods = expand_period(period);

  let mut col_keys: Vec<(String, String)> = Vec::new();
  let mut sparse: HashMap<(String, (String, String)), Decimal> =
    HashMap::new();

  for group in &def.groups {
    let metas = store
      .element_metadata(&group.elements)
      .await
      .map_err(store_err)?;
    let canonical = |requested: &str| -> String {
      metas
        .iter()
        .find(|m| {
          m.name.eq_ignore_ascii_case(requested)
            || m
              .alias
              .as_deref()
              .is_some_and(|a| a.eq_ignore_ascii_case(requested))
        })
        .map(|m| m.name.clone())
        .unwrap_or_else(|| requested.to_string())
    };

    let mut query = DataQuery::new()
      .what(group.elements.clone())
      .when_periods(periods.iter().copied());
    if let Some(district) = district {
      query = query.where_units([district]);
    }
    let mut rows = store.query_values(&query).await.map_err(store_err)?;

    // Each element counts only at its own (coarsest) granularity. A finer
    // fact for the same span is a constituent of a coarser one and would
    // double-count if both were summed.
    let own_gran: HashMap<&str, Granularity> = metas
      .iter()
      .map(|m| (m.name.as_str(), m.own_granularity))
      .collect();
    rows.retain(|row| {
      let gran = Period::parse_iso(&row.period).map(|p| p.granularity());
      match (own_gran.get(row.de_name.as_str()), gran) {
        (Some(own), Some(gran)) => gran == *own,
        _ => true,
      }
    });

    // Column keys: each requested indicator in order, fanned out over the
    // categories its facts actually carry.
    for requested in &group.elements {
      let name = canonical(requested);
      let mut categories: Vec<String> = rows
        .iter()
        .filter(|r| r.de_name == name)
        .map(|r| r.category.clone())
        .collect();
      categories.sort();
      categories.dedup();
      if categories.is_empty() {
        categories.push(DEFAULT_COMBO_NAME.to_string());
      }
      for category in categories {
        col_keys.push((name.clone(), category));
      }
    }

    // Facts recorded below the row level roll up into their ancestor at
    // that level (found by path position).
    for row in &rows {
      let Some(anchor) = row.path.get(def.org_level as usize) else {
        continue;
      };
      *sparse
        .entry((anchor.clone(), (row.de_name.clone(), row.category.clone())))
        .or_default() += row.value;
    }
  }

  let grid = rasterize(
    &row_keys,
    &col_keys,
    sparse.into_iter().map(|(key, v)| (key, Some(v))),
    |_, _| None,
  );

  let mut columns: Vec<ColumnLabel> = col_keys
    .iter()
    .map(|(element, category)| ColumnLabel {
      element:    element.clone(),
      category:   (category != DEFAULT_COMBO_NAME).then(|| category.clone()),
      calculated: false,
    })
    .collect();

  let n_cols = col_keys.len();
  let mut rows: Vec<ReportRow> = row_keys
    .iter()
    .enumerate()
    .map(|(i, name)| ReportRow {
      org_unit: name.clone(),
      values:   grid[i * n_cols..(i + 1) * n_cols]
        .iter()
        .map(|cell| cell.value)
        .collect(),
    })
    .collect();

  // Derived columns, by keyed lookup over the indicator columns.
  for calc in &def.calculations {
    let operand = |row: &ReportRow, name: &str| -> Option<Decimal> {
      let mut total: Option<Decimal> = None;
      for (col, value) in col_keys.iter().zip(&row.values) {
        if col.0.eq_ignore_ascii_case(name) {
          if let Some(v) = value {
            *total.get_or_insert_with(|| Decimal::ZERO) += *v;
          }
        }
      }
      total
    };

    for row in &mut rows {
      let numerator = operand(row, &calc.numerator);
      let denominator = operand(row, &calc.denominator);
      let value = match (numerator, denominator) {
        (Some(n), Some(d)) if !d.is_zero() => {
          Some(n * Decimal::from(calc.scale) / d)
        }
        _ => None,
      };
      row.values.push(value);
    }
    columns.push(ColumnLabel {
      element:    calc.label.clone(),
      category:   None,
      calculated: true,
    });
  }

  tracing::debug!(
    report = %def.name,
    rows = rows.len(),
    columns = columns.len(),
    "report rendered"
  );

  Ok(RenderedReport {
    title: def.name.clone(),
    level_label: level_names.name(def.org_level),
    period: period.iso(),
    columns,
    rows,
    legend_sets: def.legend_sets.clone(),
  })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quarter_expands_to_its_months() {
    let periods = expand_period(Period::Quarter(2016, 4));
    assert_eq!(
      periods,
      vec![
        Period::Quarter(2016, 4),
        Period::Month(2016, 10),
        Period::Month(2016, 11),
        Period::Month(2016, 12),
      ]
    );
  }

  #[test]
  fn year_expands_to_quarters_and_months() {
    let periods = expand_period(Period::Year(2016));
    assert_eq!(periods.len(), 1 + 4 + 12);
  }

  #[test]
  fn column_label_text_stacks_category() {
    let plain = ColumnLabel {
      element:    "OPD Attendance".into(),
      category:   None,
      calculated: false,
    };
    assert_eq!(plain.text(), "OPD Attendance");

    let split = ColumnLabel {
      element:    "ANC 1st Visit".into(),
      category:   Some("(Female)".into()),
      calculated: false,
    };
    assert_eq!(split.text(), "ANC 1st Visit\n(Female)");
  }

  #[test]
  fn report_def_deserializes_from_json() {
    let def: ReportDef = serde_json::from_str(
      r#"{
        "name": "District Scorecard",
        "org_level": 1,
        "groups": [{ "elements": ["OPD Attendance", "ANC 1st Visit"] }],
        "calculations": [{
          "label": "ANC per 100 OPD",
          "numerator": "ANC 1st Visit",
          "denominator": "OPD Attendance"
        }],
        "legend_sets": []
      }"#,
    )
    .unwrap();
    assert_eq!(def.org_level, 1);
    assert_eq!(def.calculations[0].scale, 100);
  }
}
