//! CSV rendering of a [`RenderedReport`]: non-numeric fields quoted,
//! numeric cells bare, empty cells left blank.

use csv::{QuoteStyle, WriterBuilder};

use crate::{Error, Result, scorecard::RenderedReport};

pub fn write_csv(report: &RenderedReport) -> Result<Vec<u8>> {
  let mut writer = WriterBuilder::new()
    .quote_style(QuoteStyle::NonNumeric)
    .from_writer(Vec::new());

  let mut header = vec![report.level_label.clone()];
  // Stacked category lines flatten to one.
  header.extend(report.columns.iter().map(|c| c.text().replace('\n', " ")));
  writer.write_record(&header)?;

  for row in &report.rows {
    let mut record = vec![row.org_unit.clone()];
    record.extend(
      row
        .values
        .iter()
        .map(|v| v.map(|d| d.to_string()).unwrap_or_default()),
    );
    writer.write_record(&record)?;
  }

  writer
    .into_inner()
    .map_err(|err| Error::CsvBuffer(err.into_error()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
