//! Workbook reading: calamine ranges → parsed sheets, rows and rule rows.
//!
//! Layout contract per data sheet: one header row; column 0 holds the
//! period, columns 1–3 hold location names root-down (blank-tolerant),
//! every further column is an indicator header. A sheet named
//! "Validations" instead carries `(name, left, operator, right)` rule rows.

use std::path::Path;

use calamine::{Data, Range, Reader as _, open_workbook_auto};
use rust_decimal::Decimal;

use afya_core::{
  period::Period,
  validation::{Comparator, NewValidationRule},
};

use crate::{
  Result,
  header::{ColumnHeader, parse_header},
};

/// Number of location columns between the period and the indicators.
pub const LOCATION_COLS: usize = 3;

/// Sheet name reserved for validation-rule rows.
pub const VALIDATIONS_SHEET: &str = "Validations";

/// One data row: a period, the non-blank location segments root-down, and
/// the numeric cells that survived conversion (keyed by header index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
  pub period:   Period,
  pub location: Vec<String>,
  /// The location breadcrumb as it appeared in the sheet.
  pub site_str: String,
  pub cells:    Vec<(usize, Decimal)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
  pub name:    String,
  pub headers: Vec<ColumnHeader>,
  pub rows:    Vec<DataRow>,
}

/// A fully parsed workbook plus the skip counters the summary reports.
#[derive(Debug, Clone, Default)]
pub struct WorkbookData {
  pub file_name:     String,
  pub sheets:        Vec<Sheet>,
  pub rules:         Vec<NewValidationRule>,
  pub skipped_rows:  usize,
  pub skipped_cells: usize,
}

fn cell_text(cell: &Data) -> Option<String> {
  match cell {
    Data::String(s) => {
      let trimmed = s.trim();
      (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
    Data::Int(i) => Some(i.to_string()),
    Data::Float(f) => Some(f.to_string()),
    _ => None,
  }
}

fn cell_decimal(cell: &Data) -> Option<Decimal> {
  match cell {
    Data::Int(i) => Some(Decimal::from(*i)),
    Data::Float(f) => Decimal::from_f64_retain(*f),
    Data::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Parse one data sheet. Returns the sheet plus (rows skipped, cells
/// skipped) counts.
pub fn parse_data_sheet(
  name: &str,
  range: &Range<Data>,
) -> (Sheet, usize, usize) {
  let mut rows_iter = range.rows();
  let headers: Vec<ColumnHeader> = match rows_iter.next() {
    Some(header_row) => header_row
      .iter()
      .skip(1 + LOCATION_COLS)
      .map(|cell| parse_header(&cell_text(cell).unwrap_or_default()))
      .collect(),
    None => Vec::new(),
  };

  let mut rows = Vec::new();
  let mut skipped_rows = 0;
  let mut skipped_cells = 0;

  for row in rows_iter {
    let Some(period) =
      row.first().and_then(cell_text).and_then(|s| Period::parse(&s))
    else {
      skipped_rows += 1;
      continue;
    };

    let raw_location: Vec<String> = (1..=LOCATION_COLS)
      .filter_map(|i| row.get(i).and_then(cell_text))
      .collect();
    if raw_location.is_empty() {
      skipped_rows += 1;
      continue;
    }
    let site_str = raw_location.join(" / ");

    let mut cells = Vec::new();
    for (header_idx, _) in headers.iter().enumerate() {
      let Some(cell) = row.get(1 + LOCATION_COLS + header_idx) else {
        continue;
      };
      if matches!(cell, Data::Empty) {
        continue;
      }
      match cell_decimal(cell) {
        Some(value) => cells.push((header_idx, value)),
        None => skipped_cells += 1,
      }
    }

    rows.push(DataRow {
      period,
      location: raw_location,
      site_str,
      cells,
    });
  }

  (
    Sheet {
      name: name.to_string(),
      headers,
      rows,
    },
    skipped_rows,
    skipped_cells,
  )
}

/// Parse a "Validations" sheet: each row is `(name, left, op, right)`;
/// rows whose operator cell does not parse (the header row included) are
/// dropped.
pub fn parse_validations_sheet(range: &Range<Data>) -> Vec<NewValidationRule> {
  let mut rules = Vec::new();
  for row in range.rows() {
    let text = |i: usize| row.get(i).and_then(cell_text);
    let (Some(name), Some(left), Some(op), Some(right)) =
      (text(0), text(1), text(2), text(3))
    else {
      continue;
    };
    let Some(comparator) = Comparator::parse(&op) else {
      continue;
    };
    rules.push(NewValidationRule {
      name,
      left_expr: left,
      comparator,
      right_expr: right,
    });
  }
  rules
}

/// Read a workbook file into a [`WorkbookData`].
pub fn read_workbook(path: impl AsRef<Path>) -> Result<WorkbookData> {
  let path = path.as_ref();
  let mut workbook = open_workbook_auto(path)?;

  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let mut data = WorkbookData {
    file_name,
    ..WorkbookData::default()
  };

  for sheet_name in workbook.sheet_names() {
    let range = workbook.worksheet_range(&sheet_name)?;
    if sheet_name.eq_ignore_ascii_case(VALIDATIONS_SHEET) {
      data.rules.extend(parse_validations_sheet(&range));
      continue;
    }
    let (sheet, skipped_rows, skipped_cells) =
      parse_data_sheet(&sheet_name, &range);
    tracing::debug!(
      sheet = %sheet.name,
      rows = sheet.rows.len(),
      skipped_rows,
      skipped_cells,
      "parsed worksheet"
    );
    data.skipped_rows += skipped_rows;
    data.skipped_cells += skipped_cells;
    data.sheets.push(sheet);
  }

  Ok(data)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn range(cells: &[&[&str]]) -> Range<Data> {
    let rows = cells.len() as u32;
    let cols = cells.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
    let mut range = Range::new((0, 0), (rows - 1, cols - 1));
    for (r, row) in cells.iter().enumerate() {
      for (c, cell) in row.iter().enumerate() {
        if !cell.is_empty() {
          range.set_value(
            (r as u32, c as u32),
            Data::String(cell.to_string()),
          );
        }
      }
    }
    range
  }

  #[test]
  fn data_sheet_parses_periods_locations_and_cells() {
    let r = range(&[
      &["Period", "District", "Subcounty", "Facility", "OPD Attendance", "ANC 1st Visit Female"],
      &["Oct 2016", "Apac", "Apac SC", "Alpha HC III", "100", "7"],
      &["2016-Q4", "Apac", "", "", "250", ""],
      &["not a period", "Apac", "", "", "1", "2"],
      &["Nov 2016", "Apac", "Apac SC", "Alpha HC III", "fifty", "3"],
    ]);
    let (sheet, skipped_rows, skipped_cells) = parse_data_sheet("OPD", &r);

    assert_eq!(sheet.headers.len(), 2);
    assert_eq!(sheet.headers[0].element, "OPD Attendance");
    assert_eq!(sheet.headers[1].element, "ANC 1st Visit");
    assert_eq!(sheet.headers[1].categories, vec!["Female"]);

    assert_eq!(sheet.rows.len(), 3);
    assert_eq!(skipped_rows, 1);
    // "fifty" is dropped cell-by-cell, the rest of its row survives.
    assert_eq!(skipped_cells, 1);

    let quarterly = &sheet.rows[1];
    assert_eq!(quarterly.period, Period::Quarter(2016, 4));
    assert_eq!(quarterly.location, vec!["Apac"]);
    assert_eq!(quarterly.cells, vec![(0, Decimal::from(250))]);

    let partial = &sheet.rows[2];
    assert_eq!(partial.cells, vec![(1, Decimal::from(3))]);
  }

  #[test]
  fn rows_without_any_location_are_skipped() {
    let r = range(&[
      &["Period", "District", "Subcounty", "Facility", "OPD"],
      &["Oct 2016", "", "", "", "100"],
    ]);
    let (sheet, skipped_rows, _) = parse_data_sheet("OPD", &r);
    assert!(sheet.rows.is_empty());
    assert_eq!(skipped_rows, 1);
  }

  #[test]
  fn validations_sheet_drops_header_and_bad_operators() {
    let r = range(&[
      &["Name", "Left", "Op", "Right"],
      &["anc within population", "ANC 1st Visit", "<=", "Population"],
      &["broken", "A", "~", "B"],
    ]);
    let rules = parse_validations_sheet(&r);
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "anc within population");
    assert_eq!(rules[0].comparator, Comparator::Le);
  }
}
