use afya_core::{
  orgunit::LevelNames, period::Period, store::HmisStore as _,
  value::NewDataValue,
};
use afya_store_sqlite::SqliteStore;
use rust_decimal::Decimal;

use crate::{
  CalcDef, IndicatorGroup, Legend, LegendSet, ReportDef, run_report,
  write_csv, write_xlsx,
};

async fn seeded_store() -> SqliteStore {
  let store = SqliteStore::open_in_memory().await.unwrap();

  let mut units = Vec::new();
  for (district, facility) in [
    ("Apac District", "Alpha HC III"),
    ("Apac District", "Beta HC II"),
    ("Gulu District", "Awach HC IV"),
  ] {
    let segments: Vec<String> =
      ["Uganda", district, facility].map(String::from).to_vec();
    units.push(store.lookup_or_create_path(&segments).await.unwrap());
  }

  let opd = store.ensure_element("OPD Attendance").await.unwrap();
  let anc = store.ensure_element("ANC 1st Visit").await.unwrap();

  // Monthly OPD everywhere, ANC only in Apac.
  for (unit, month, value) in [
    (0, 10, "100"),
    (0, 11, "60"),
    (1, 10, "40"),
    (2, 10, "90"),
  ] {
    store
      .upsert_value(NewDataValue::new(
        opd.id,
        units[unit].id,
        Period::Month(2016, month),
        value.parse::<Decimal>().unwrap(),
      ))
      .await
      .unwrap();
  }
  store
    .upsert_value(NewDataValue::new(
      anc.id,
      units[0].id,
      Period::Month(2016, 10),
      Decimal::from(50),
    ))
    .await
    .unwrap();

  store
}

fn def() -> ReportDef {
  ReportDef {
    name:         "District Scorecard".into(),
    org_level:    1,
    groups:       vec![IndicatorGroup {
      title:    None,
      elements: vec!["OPD Attendance".into(), "ANC 1st Visit".into()],
    }],
    calculations: vec![CalcDef {
      label:       "ANC per 100 OPD".into(),
      numerator:   "ANC 1st Visit".into(),
      denominator: "OPD Attendance".into(),
      scale:       100,
    }],
    legend_sets:  vec![LegendSet {
      name:     "coverage".into(),
      legends:  vec![Legend {
        color: "green".into(),
        start: Some(0.0),
        end:   None,
      }],
      mappings: vec![crate::ColumnSpan { first: 1, last: 3 }],
    }],
  }
}

#[tokio::test]
async fn quarterly_scorecard_rolls_monthly_facts_up() {
  let store = seeded_store().await;
  let report = run_report(
    &store,
    &def(),
    Period::Quarter(2016, 4),
    None,
    &LevelNames::default(),
  )
  .await
  .unwrap();

  assert_eq!(report.level_label, "District");
  assert_eq!(report.period, "2016-Q4");

  // Districts are name-ordered; columns = OPD, ANC, derived ratio.
  let names: Vec<&str> =
    report.rows.iter().map(|r| r.org_unit.as_str()).collect();
  assert_eq!(names, vec!["Apac District", "Gulu District"]);
  assert_eq!(report.columns.len(), 3);
  assert!(report.columns[2].calculated);

  let apac = &report.rows[0];
  // 100 + 60 + 40 monthly facts folded into the quarter.
  assert_eq!(apac.values[0], Some(Decimal::from(200)));
  assert_eq!(apac.values[1], Some(Decimal::from(50)));
  assert_eq!(apac.values[2], Some(Decimal::from(25)));

  // Gulu has no ANC facts: gap cell plus zero-guarded calculation.
  let gulu = &report.rows[1];
  assert_eq!(gulu.values[0], Some(Decimal::from(90)));
  assert_eq!(gulu.values[1], None);
  assert_eq!(gulu.values[2], None);
}

#[tokio::test]
async fn mixed_granularity_facts_count_once() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let segments: Vec<String> =
    ["Uganda", "Apac District", "Alpha HC III"].map(String::from).to_vec();
  let unit = store.lookup_or_create_path(&segments).await.unwrap();
  let opd = store.ensure_element("OPD Attendance").await.unwrap();

  // A quarterly return restating what the monthly submissions already
  // reported: only the quarterly figure may land in the cell.
  for month in [10, 11] {
    store
      .upsert_value(NewDataValue::new(
        opd.id,
        unit.id,
        Period::Month(2016, month),
        Decimal::from(100),
      ))
      .await
      .unwrap();
  }
  store
    .upsert_value(NewDataValue::new(
      opd.id,
      unit.id,
      Period::Quarter(2016, 4),
      Decimal::from(230),
    ))
    .await
    .unwrap();

  let def = ReportDef {
    name:         "OPD Quarterly".into(),
    org_level:    1,
    groups:       vec![IndicatorGroup {
      title:    None,
      elements: vec!["OPD Attendance".into()],
    }],
    calculations: vec![],
    legend_sets:  vec![],
  };
  let report = run_report(
    &store,
    &def,
    Period::Quarter(2016, 4),
    None,
    &LevelNames::default(),
  )
  .await
  .unwrap();

  assert_eq!(report.rows.len(), 1);
  assert_eq!(report.rows[0].values[0], Some(Decimal::from(230)));
}

#[tokio::test]
async fn district_filter_narrows_the_rows() {
  let store = seeded_store().await;
  let report = run_report(
    &store,
    &def(),
    Period::Quarter(2016, 4),
    Some("Gulu District"),
    &LevelNames::default(),
  )
  .await
  .unwrap();
  assert_eq!(report.rows.len(), 1);
  assert_eq!(report.rows[0].org_unit, "Gulu District");
}

#[tokio::test]
async fn unknown_district_renders_an_empty_grid() {
  let store = seeded_store().await;
  let report = run_report(
    &store,
    &def(),
    Period::Quarter(2016, 4),
    Some("Atlantis"),
    &LevelNames::default(),
  )
  .await
  .unwrap();
  assert!(report.rows.is_empty());
  // Column structure survives for the header row.
  assert_eq!(report.columns.len(), 3);
}

#[tokio::test]
async fn rendered_report_serializes_to_both_formats() {
  let store = seeded_store().await;
  let report = run_report(
    &store,
    &def(),
    Period::Quarter(2016, 4),
    None,
    &LevelNames::default(),
  )
  .await
  .unwrap();

  let csv_text = String::from_utf8(write_csv(&report).unwrap()).unwrap();
  assert!(csv_text.starts_with("\"District\""));
  assert!(csv_text.contains("\"Apac District\",200,50,25"));

  let xlsx = write_xlsx(&report).unwrap();
  assert_eq!(&xlsx[..2], b"PK");
}
