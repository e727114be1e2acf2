//! XLSX rendering of a [`RenderedReport`], plus the A1 column-name
//! bijection the legend ranges are written in.

use rust_decimal::prelude::ToPrimitive as _;
use rust_xlsxwriter::{Format, Workbook};

use crate::{Result, scorecard::RenderedReport};

// ─── Column names ────────────────────────────────────────────────────────────

/// Zero-indexed bijective base-26 column name: 0 → "A", 25 → "Z",
/// 26 → "AA".
pub fn column_name(index: u32) -> String {
  let mut n = index;
  let mut out = String::new();
  loop {
    out.insert(0, char::from(b'A' + (n % 26) as u8));
    if n < 26 {
      break;
    }
    n = n / 26 - 1;
  }
  out
}

/// One-indexed variant: 1 → "A". Spreadsheet UIs and some configuration
/// sources count columns from 1.
pub fn column_name_one_indexed(index: u32) -> String {
  column_name(index.saturating_sub(1))
}

/// Inverse of [`column_name`].
pub fn column_index(name: &str) -> Option<u32> {
  if name.is_empty() {
    return None;
  }
  let mut acc: u32 = 0;
  for c in name.chars() {
    let digit = (c.to_ascii_uppercase() as u32).checked_sub('A' as u32)?;
    if digit >= 26 {
      return None;
    }
    acc = acc.checked_mul(26)?.checked_add(digit + 1)?;
  }
  Some(acc - 1)
}

// ─── Workbook writer ─────────────────────────────────────────────────────────

const A4: u8 = 9;

/// Serialize a rendered report into an in-memory `.xlsx` workbook:
/// landscape A4, bold wrapped header row, numeric data cells, and the
/// report's legend sets applied as conditional formats.
pub fn write_xlsx(report: &RenderedReport) -> Result<Vec<u8>> {
  let mut workbook = Workbook::new();
  let worksheet = workbook.add_worksheet();
  worksheet.set_name(&report.title)?;
  worksheet.set_landscape();
  worksheet.set_paper_size(A4);

  let header = Format::new().set_bold().set_text_wrap();
  worksheet.write_string_with_format(0, 0, &report.level_label, &header)?;
  for (i, column) in report.columns.iter().enumerate() {
    worksheet.write_string_with_format(
      0,
      (i + 1) as u16,
      column.text(),
      &header,
    )?;
  }
  worksheet.set_column_width(0, 28)?;

  for (r, row) in report.rows.iter().enumerate() {
    let r = (r + 1) as u32;
    worksheet.write_string(r, 0, &row.org_unit)?;
    for (c, value) in row.values.iter().enumerate() {
      if let Some(value) = value {
        worksheet.write_number(
          r,
          (c + 1) as u16,
          value.to_f64().unwrap_or_default(),
        )?;
      }
    }
  }

  for set in &report.legend_sets {
    let rules = set.conditional_formats();
    for (first_row, first_col, last_row, last_col) in set.format_rects(true) {
      for rule in &rules {
        worksheet.add_conditional_format(
          first_row, first_col, last_row, last_col, rule,
        )?;
      }
    }
  }

  Ok(workbook.save_to_buffer()?)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scorecard::{ColumnLabel, ReportRow};
  use rust_decimal::Decimal;

  #[test]
  fn column_names_cover_the_boundaries() {
    assert_eq!(column_name(0), "A");
    assert_eq!(column_name(25), "Z");
    assert_eq!(column_name(26), "AA");
    assert_eq!(column_name(51), "AZ");
    assert_eq!(column_name(52), "BA");
    assert_eq!(column_name(701), "ZZ");
    assert_eq!(column_name(702), "AAA");
  }

  #[test]
  fn column_name_roundtrips() {
    for i in (0..2_000).chain([16_383]) {
      assert_eq!(column_index(&column_name(i)), Some(i));
    }
    assert_eq!(column_index(""), None);
    assert_eq!(column_index("A1"), None);
  }

  #[test]
  fn one_indexed_offset_identity() {
    for i in 0..100 {
      assert_eq!(column_name(i), column_name_one_indexed(i + 1));
    }
  }

  #[test]
  fn workbook_serializes() {
    let report = RenderedReport {
      title:       "District Scorecard".into(),
      level_label: "District".into(),
      period:      "2016-Q4".into(),
      columns:     vec![ColumnLabel {
        element:    "OPD Attendance".into(),
        category:   None,
        calculated: false,
      }],
      rows:        vec![ReportRow {
        org_unit: "Apac District".into(),
        values:   vec![Some(Decimal::from(180))],
      }],
      legend_sets: Vec::new(),
    };
    let bytes = write_xlsx(&report).unwrap();
    // XLSX containers are zip files.
    assert_eq!(&bytes[..2], b"PK");
  }
}
