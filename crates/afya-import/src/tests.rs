use afya_core::{period::Period, query::DataQuery, store::HmisStore as _};
use afya_store_sqlite::SqliteStore;
use rust_decimal::Decimal;

use crate::{
  ColumnHeader, DataRow, Sheet, WorkbookData, apply_batch, parse_header,
};

fn two_row_workbook() -> WorkbookData {
  let headers = vec![
    parse_header("105-1 OPD Attendance"),
    parse_header("ANC 1st Visit Female"),
  ];
  let rows = vec![
    DataRow {
      period:   Period::Month(2016, 10),
      location: vec!["Apac District".into(), "Alpha HC III".into()],
      site_str: "Apac District / Alpha HC III".into(),
      cells:    vec![(0, Decimal::from(100)), (1, Decimal::from(7))],
    },
    DataRow {
      period:   Period::Month(2016, 11),
      location: vec!["Apac District".into(), "Alpha HC III".into()],
      site_str: "Apac District / Alpha HC III".into(),
      cells:    vec![(0, Decimal::from(50))],
    },
  ];
  WorkbookData {
    file_name: "october.xlsx".into(),
    sheets: vec![Sheet {
      name: "OPD".into(),
      headers,
      rows,
    }],
    rules: Vec::new(),
    skipped_rows: 0,
    skipped_cells: 0,
  }
}

#[tokio::test]
async fn two_row_workbook_applies_end_to_end() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let root = vec!["Uganda".to_string()];

  let summary = apply_batch(&store, &two_row_workbook(), &root).await.unwrap();
  assert_eq!(summary.values_written, 3);
  assert_eq!(summary.cells_skipped, 0);

  // Facts landed under the configured root, annotated with their path.
  let rows = store
    .query_values(&DataQuery::new().what(["105-1 OPD Attendance"]))
    .await
    .unwrap();
  assert_eq!(rows.len(), 2);
  assert_eq!(
    rows[0].path,
    vec!["Uganda", "Apac District", "Alpha HC III"]
  );

  // The categorised column produced a non-default combo.
  let anc = store
    .query_values(&DataQuery::new().what(["ANC 1st Visit"]))
    .await
    .unwrap();
  assert_eq!(anc.len(), 1);
  assert_eq!(anc[0].category, "(Female)");
}

#[tokio::test]
async fn reimport_updates_rather_than_duplicates() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let root = vec!["Uganda".to_string()];

  apply_batch(&store, &two_row_workbook(), &root).await.unwrap();

  let mut second = two_row_workbook();
  second.sheets[0].rows[0].cells[0] = (0, Decimal::from(120));
  apply_batch(&store, &second, &root).await.unwrap();

  let rows = store
    .query_values(
      &DataQuery::new().what(["105-1 OPD Attendance"]).when(["2016-10"]),
    )
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].value, Decimal::from(120));
}

#[tokio::test]
async fn rules_from_the_validations_sheet_are_saved() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let mut data = two_row_workbook();
  data.rules.push(afya_core::validation::NewValidationRule {
    name:       "anc under opd".into(),
    left_expr:  "ANC 1st Visit".into(),
    comparator: afya_core::validation::Comparator::Le,
    right_expr: "105-1 OPD Attendance".into(),
  });
  data.rules.push(afya_core::validation::NewValidationRule {
    name:       "mystery".into(),
    left_expr:  "No Such Indicator".into(),
    comparator: afya_core::validation::Comparator::Eq,
    right_expr: "0".into(),
  });

  let summary =
    apply_batch(&store, &data, &["Uganda".to_string()]).await.unwrap();
  assert_eq!(summary.rules_saved, 2);
  assert_eq!(summary.rules_unresolved, 1);

  let rules = store.list_validation_rules().await.unwrap();
  assert_eq!(rules.len(), 2);
}
