//! The aggregate/pivot/calculation SQL builder.
//!
//! Indicators are recorded at heterogeneous hierarchy depths and
//! heterogeneous time granularities; before arithmetic between two
//! indicators is well-defined they must be rectangularised onto one common
//! (shallowest-level, coarsest-granularity) grid. This module assembles
//! that query in four nested stages:
//!
//! 1. group — per (level, granularity) bucket, facts joined to one
//!    org-unit self-join per ancestor level, period columns aligned to the
//!    target granularity (coarser buckets exploded across sub-periods);
//! 2. union — all buckets UNION ALLed;
//! 3. aggregate — GROUP BY period + org columns + element name, SUM/COUNT;
//! 4. pivot — one `de_<id>` column per element, rescaled when the element
//!    is coarser than the target grid;
//! 5. calculation — caller-supplied arithmetic columns with zero-guarded
//!    divisors, restricted to the requested periods.
//!
//! Everything embedded into the SQL text passes through an escape or a
//! character gate; element names are additionally rejected at write time
//! by [`afya_core::element::check_sql_safe`].

use afya_core::{
  period::{Granularity, Period},
  store::ElementMeta,
};

use crate::{Error, Result};

// ─── Fragment gates ──────────────────────────────────────────────────────────

/// Escape and quote a string for embedding as a SQL literal.
pub fn sql_str_lit(s: &str) -> String {
  format!("'{}'", s.replace('\'', "''"))
}

/// Column name for the org-unit ancestor at `level`.
fn ou_col(level: u32) -> String {
  format!("ou{level}_name")
}

/// Comma-joined `ou0_name, .., ouN_name` up to `target_level` inclusive.
fn ou_cols(target_level: u32) -> String {
  (0..=target_level)
    .map(ou_col)
    .collect::<Vec<_>>()
    .join(", ")
}

/// Accept only what a substituted arithmetic expression may contain:
/// pivot-column tokens, numbers, arithmetic, comparison and grouping.
fn check_expr(expr: &str) -> Result<()> {
  let ok = |c: char| {
    c.is_ascii_alphanumeric()
      || c.is_whitespace()
      || matches!(c, '_' | '+' | '-' | '*' | '/' | '(' | ')' | '.' | '<' | '>' | '=' | ',' | '%')
  };
  if expr.chars().all(ok) {
    Ok(())
  } else {
    Err(Error::Core(afya_core::Error::UnsafeName(expr.to_string())))
  }
}

fn check_column(name: &str) -> Result<()> {
  let mut chars = name.chars();
  let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
  if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
    Ok(())
  } else {
    Err(Error::Core(afya_core::Error::UnsafeName(name.to_string())))
  }
}

// ─── Calculated fields ───────────────────────────────────────────────────────

/// One derived column for the calculation stage. `expr` references the
/// pivot's `de_<id>` columns; each name in `zero_guard` wraps the
/// expression in a NULL-on-zero-divisor case.
#[derive(Debug, Clone)]
pub struct CalcField {
  pub expr:       String,
  pub zero_guard: Vec<String>,
}

impl CalcField {
  pub fn new(expr: impl Into<String>) -> Self {
    Self {
      expr:       expr.into(),
      zero_guard: Vec::new(),
    }
  }

  pub fn guarded(expr: impl Into<String>, divisors: Vec<String>) -> Self {
    Self {
      expr:       expr.into(),
      zero_guard: divisors,
    }
  }
}

// ─── Stage 1: group ──────────────────────────────────────────────────────────

/// Inline `(SELECT 1 AS n UNION ALL SELECT 2 ...)` derived table.
fn seq_table(count: u32) -> String {
  let mut parts = vec!["SELECT 1 AS n".to_string()];
  for n in 2..=count {
    parts.push(format!("SELECT {n}"));
  }
  format!("({})", parts.join(" UNION ALL "))
}

/// Period-column expressions for a bucket at `own` granularity rendered at
/// `target` granularity, plus the explosion row count (1 = no explosion).
fn period_exprs(own: Granularity, target: Granularity) -> (String, String, String, u32) {
  use Granularity::{Month, Quarter, Year};
  let quarter_from_month =
    "substr(dv.month, 1, 4) || '-Q' || ((CAST(substr(dv.month, 6, 2) AS INTEGER) + 2) / 3)";
  match (own, target) {
    (Month, Month) => (
      "substr(dv.month, 1, 4)".into(),
      quarter_from_month.into(),
      "dv.month".into(),
      1,
    ),
    (Month, Quarter) => (
      "substr(dv.month, 1, 4)".into(),
      quarter_from_month.into(),
      "NULL".into(),
      1,
    ),
    (Month, Year) => ("substr(dv.month, 1, 4)".into(), "NULL".into(), "NULL".into(), 1),
    (Quarter, Month) => (
      "substr(dv.quarter, 1, 4)".into(),
      "dv.quarter".into(),
      "printf('%s-%02d', substr(dv.quarter, 1, 4), \
       (CAST(substr(dv.quarter, 7, 1) AS INTEGER) - 1) * 3 + seq.n)"
        .into(),
      3,
    ),
    (Quarter, Quarter) => (
      "substr(dv.quarter, 1, 4)".into(),
      "dv.quarter".into(),
      "NULL".into(),
      1,
    ),
    (Quarter, Year) => (
      "substr(dv.quarter, 1, 4)".into(),
      "NULL".into(),
      "NULL".into(),
      1,
    ),
    (Year, Month) => (
      "dv.year".into(),
      "dv.year || '-Q' || ((seq.n + 2) / 3)".into(),
      "printf('%s-%02d', dv.year, seq.n)".into(),
      12,
    ),
    (Year, Quarter) => (
      "dv.year".into(),
      "dv.year || '-Q' || seq.n".into(),
      "NULL".into(),
      4,
    ),
    (Year, Year) => ("dv.year".into(), "NULL".into(), "NULL".into(), 1),
  }
}

/// One SELECT for a same-level, same-granularity element bucket.
pub fn de_group_sql(
  bucket: &[&ElementMeta],
  own_gran: Granularity,
  target_level: u32,
  target_gran: Granularity,
) -> String {
  let (year_expr, quarter_expr, month_expr, explode) =
    period_exprs(own_gran, target_gran);

  let mut joins = vec![
    "FROM data_values dv".to_string(),
    "JOIN org_units ou ON ou.id = dv.org_unit_id".to_string(),
  ];
  for level in 0..=target_level {
    joins.push(format!(
      "JOIN org_units a{level} ON a{level}.level = {level} \
       AND a{level}.lft <= ou.lft AND a{level}.rght >= ou.rght"
    ));
  }
  joins.push("JOIN data_elements de ON de.id = dv.data_element_id".to_string());
  if explode > 1 {
    joins.push(format!("CROSS JOIN {} seq", seq_table(explode)));
  }

  let own_col = match own_gran {
    Granularity::Month => "dv.month",
    Granularity::Quarter => "dv.quarter",
    Granularity::Year => "dv.year",
  };
  let names = bucket
    .iter()
    .map(|m| sql_str_lit(&m.name))
    .collect::<Vec<_>>()
    .join(", ");

  let ancestor_cols = (0..=target_level)
    .map(|l| format!("a{l}.name AS {}", ou_col(l)))
    .collect::<Vec<_>>()
    .join(", ");

  format!(
    "SELECT {year_expr} AS year, {quarter_expr} AS quarter, \
     {month_expr} AS month, {ancestor_cols}, de.name AS de_name, \
     CAST(dv.numeric_value AS REAL) AS fvalue\n{}\nWHERE de.name IN ({names}) \
     AND {own_col} IS NOT NULL",
    joins.join("\n")
  )
}

// ─── Stage 2: union ──────────────────────────────────────────────────────────

/// Bucket `metas` by (own level, own granularity) and UNION ALL the
/// per-bucket group SELECTs. Bucket order is deterministic (level, then
/// granularity fine-to-coarse).
pub fn union_sql(
  metas: &[ElementMeta],
  target_level: u32,
  target_gran: Granularity,
) -> String {
  use std::collections::BTreeMap;

  let mut buckets: BTreeMap<(u32, Granularity), Vec<&ElementMeta>> =
    BTreeMap::new();
  for meta in metas {
    buckets
      .entry((meta.own_level, meta.own_granularity))
      .or_default()
      .push(meta);
  }

  buckets
    .values()
    .map(|bucket| {
      de_group_sql(bucket, bucket[0].own_granularity, target_level, target_gran)
    })
    .collect::<Vec<_>>()
    .join("\nUNION ALL\n")
}

// ─── Stage 3: aggregate ──────────────────────────────────────────────────────

pub fn aggregate_sql(inner: &str, target_level: u32) -> String {
  let ou = ou_cols(target_level);
  format!(
    "SELECT year, quarter, month, {ou}, de_name, \
     SUM(fvalue) AS numeric_sum, COUNT(fvalue) AS value_count\n\
     FROM (\n{inner}\n)\n\
     GROUP BY year, quarter, month, {ou}, de_name"
  )
}

// ─── Stage 4: pivot ──────────────────────────────────────────────────────────

/// One `de_<id>` column per element; elements whose own granularity is
/// coarser than the target get their (exploded) sums divided by the
/// sub-period count, estimating an even share per sub-period.
pub fn pivot_sql(
  inner: &str,
  metas: &[ElementMeta],
  target_level: u32,
  target_gran: Granularity,
) -> String {
  let ou = ou_cols(target_level);
  let columns = metas
    .iter()
    .map(|meta| {
      let case = format!(
        "SUM(CASE WHEN de_name = {} THEN numeric_sum ELSE 0 END)",
        sql_str_lit(&meta.name)
      );
      let ratio = target_gran.per(meta.own_granularity.max(target_gran));
      if ratio > 1 {
        format!("{case} / {ratio}.0 AS de_{}", meta.id)
      } else {
        format!("{case} AS de_{}", meta.id)
      }
    })
    .collect::<Vec<_>>()
    .join(", ");

  format!(
    "SELECT year, quarter, month, {ou}, {columns}\n\
     FROM (\n{inner}\n)\n\
     GROUP BY year, quarter, month, {ou}"
  )
}

// ─── Stage 5: calculation ────────────────────────────────────────────────────

/// Period restriction: requested periods grouped by which column they
/// resolve to, ORed within a column (via IN), ANDed across columns.
pub(crate) fn period_where(periods: &[Period]) -> Option<String> {
  let mut months = Vec::new();
  let mut quarters = Vec::new();
  let mut years = Vec::new();
  for p in periods {
    match p.granularity() {
      Granularity::Month => months.push(sql_str_lit(&p.iso())),
      Granularity::Quarter => quarters.push(sql_str_lit(&p.iso())),
      Granularity::Year => years.push(sql_str_lit(&p.iso())),
    }
  }

  let mut clauses = Vec::new();
  for (col, lits) in
    [("month", months), ("quarter", quarters), ("year", years)]
  {
    if !lits.is_empty() {
      clauses.push(format!("{col} IN ({})", lits.join(", ")));
    }
  }
  if clauses.is_empty() {
    None
  } else {
    Some(clauses.join(" AND "))
  }
}

/// Re-expose the pivot columns and add one `de_calc_<n>` per calculated
/// field, each optionally guarded against zero divisors.
pub fn calculation_sql(
  inner: &str,
  metas: &[ElementMeta],
  calcs: &[CalcField],
  periods: &[Period],
  target_level: u32,
) -> Result<String> {
  let ou = ou_cols(target_level);
  let de_columns = metas
    .iter()
    .map(|m| format!("de_{}", m.id))
    .collect::<Vec<_>>()
    .join(", ");

  let mut calc_columns = Vec::new();
  for (i, calc) in calcs.iter().enumerate() {
    check_expr(&calc.expr)?;
    let column = if calc.zero_guard.is_empty() {
      format!("({}) AS de_calc_{}", calc.expr, i + 1)
    } else {
      let guards = calc
        .zero_guard
        .iter()
        .map(|d| {
          check_column(d)?;
          Ok(format!("{d} <> 0"))
        })
        .collect::<Result<Vec<_>>>()?
        .join(" AND ");
      format!(
        "CASE WHEN {guards} THEN ({}) ELSE NULL END AS de_calc_{}",
        calc.expr,
        i + 1
      )
    };
    calc_columns.push(column);
  }

  let mut columns = format!("year, quarter, month, {ou}");
  if !de_columns.is_empty() {
    columns.push_str(", ");
    columns.push_str(&de_columns);
  }
  if !calc_columns.is_empty() {
    columns.push_str(", ");
    columns.push_str(&calc_columns.join(", "));
  }

  let mut sql = format!("SELECT {columns}\nFROM (\n{inner}\n)");
  if let Some(clause) = period_where(periods) {
    sql.push_str("\nWHERE ");
    sql.push_str(&clause);
  }
  Ok(sql)
}

/// The full five-stage pipeline in one call.
pub fn pivot_query(
  metas: &[ElementMeta],
  target_level: u32,
  target_gran: Granularity,
  calcs: &[CalcField],
  periods: &[Period],
) -> Result<String> {
  let union = union_sql(metas, target_level, target_gran);
  let aggregate = aggregate_sql(&union, target_level);
  let pivot = pivot_sql(&aggregate, metas, target_level, target_gran);
  calculation_sql(&pivot, metas, calcs, periods, target_level)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn meta(id: i64, name: &str, level: u32, gran: Granularity) -> ElementMeta {
    ElementMeta {
      id,
      name: name.to_string(),
      alias: None,
      own_level: level,
      own_granularity: gran,
    }
  }

  #[test]
  fn group_sql_joins_one_ancestor_per_level() {
    let m = meta(1, "OPD Attendance", 3, Granularity::Month);
    let sql = de_group_sql(&[&m], Granularity::Month, 2, Granularity::Quarter);
    assert!(sql.contains("JOIN org_units a0"));
    assert!(sql.contains("JOIN org_units a2"));
    assert!(!sql.contains("JOIN org_units a3"));
    assert!(sql.contains("de.name IN ('OPD Attendance')"));
    assert!(sql.contains("dv.month IS NOT NULL"));
    // Monthly data at quarterly target: month column nulled out.
    assert!(sql.contains("NULL AS month"));
  }

  #[test]
  fn annual_bucket_explodes_across_quarters() {
    let m = meta(2, "Population", 1, Granularity::Year);
    let sql = de_group_sql(&[&m], Granularity::Year, 1, Granularity::Quarter);
    assert!(sql.contains("CROSS JOIN"));
    assert!(sql.contains("SELECT 1 AS n UNION ALL SELECT 2 UNION ALL SELECT 3 UNION ALL SELECT 4"));
    assert!(sql.contains("dv.year || '-Q' || seq.n"));
  }

  #[test]
  fn union_buckets_by_level_and_granularity() {
    let metas = vec![
      meta(1, "A", 3, Granularity::Month),
      meta(2, "B", 3, Granularity::Month),
      meta(3, "C", 1, Granularity::Year),
    ];
    let sql = union_sql(&metas, 1, Granularity::Quarter);
    assert_eq!(sql.matches("UNION ALL\nSELECT").count(), 1);
    assert!(sql.contains("de.name IN ('A', 'B')"));
    assert!(sql.contains("de.name IN ('C')"));
  }

  #[test]
  fn pivot_rescales_coarser_elements() {
    let metas = vec![
      meta(1, "A", 1, Granularity::Quarter),
      meta(2, "Pop", 1, Granularity::Year),
    ];
    let sql = pivot_sql("X", &metas, 1, Granularity::Quarter);
    assert!(sql.contains("ELSE 0 END) AS de_1"));
    assert!(sql.contains("ELSE 0 END) / 4.0 AS de_2"));
  }

  #[test]
  fn calculation_guards_divisors_and_filters_periods() {
    let metas = vec![meta(1, "A", 1, Granularity::Quarter)];
    let calcs = vec![CalcField::guarded(
      "de_1 * 100.0 / de_1",
      vec!["de_1".to_string()],
    )];
    let periods = vec![
      Period::Quarter(2016, 4),
      Period::Quarter(2017, 1),
      Period::Year(2016),
    ];
    let sql = calculation_sql("X", &metas, &calcs, &periods, 1).unwrap();
    assert!(sql.contains("CASE WHEN de_1 <> 0 THEN (de_1 * 100.0 / de_1) ELSE NULL END AS de_calc_1"));
    assert!(sql.contains("quarter IN ('2016-Q4', '2017-Q1')"));
    assert!(sql.contains("year IN ('2016')"));
    assert!(sql.contains(") AND ") || sql.contains("') AND "));
  }

  #[test]
  fn calculation_rejects_unsafe_expressions() {
    let metas = vec![meta(1, "A", 1, Granularity::Quarter)];
    let calcs = vec![CalcField::new("de_1; DROP TABLE data_values")];
    assert!(calculation_sql("X", &metas, &calcs, &[], 1).is_err());

    let calcs = vec![CalcField::guarded(
      "de_1".to_string(),
      vec!["de_1 OR 1=1".to_string()],
    )];
    assert!(calculation_sql("X", &metas, &calcs, &[], 1).is_err());
  }

  #[test]
  fn literals_are_escaped() {
    assert_eq!(sql_str_lit("O'Brien"), "'O''Brien'");
  }
}
