//! Spreadsheet ingestion for the Afya HMIS: the worksheet grammar
//! (periods, location columns, indicator headers with category suffixes),
//! the "Validations" rule sheet, and a driver that applies a parsed
//! workbook to any [`afya_core::store::HmisStore`].

mod apply;
mod header;
mod workbook;

pub mod error;

pub use apply::{ImportSummary, apply_batch, apply_rules, resolve_values};
pub use error::{Error, Result};
pub use header::{CATEGORY_VOCABULARY, ColumnHeader, parse_header};
pub use workbook::{
  DataRow, LOCATION_COLS, Sheet, VALIDATIONS_SHEET, WorkbookData,
  parse_data_sheet, parse_validations_sheet, read_workbook,
};

#[cfg(test)]
mod tests;
