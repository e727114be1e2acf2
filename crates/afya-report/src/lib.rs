//! Scorecard reporting for the Afya HMIS: declarative report definitions,
//! the group → fetch → rasterize → derive runner, legend sets with
//! conditional-format emission, and XLSX/CSV serialization.

mod csv;
mod excel;
mod legend;
mod scorecard;

pub mod error;

pub use csv::write_csv;
pub use error::{Error, Result};
pub use excel::{column_index, column_name, column_name_one_indexed, write_xlsx};
pub use legend::{ColumnSpan, Legend, LegendSet};
pub use scorecard::{
  CalcDef, ColumnLabel, IndicatorGroup, RenderedReport, ReportDef, ReportRow,
  run_report,
};

#[cfg(test)]
mod tests;
