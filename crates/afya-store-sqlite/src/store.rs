//! [`SqliteStore`] — the SQLite implementation of
//! [`afya_core::store::HmisStore`].

use std::{path::Path, str::FromStr as _, sync::Arc};

use chrono::Utc;
use rusqlite::{
  Connection, OptionalExtension as _, params, params_from_iter,
  types::Value as SqlValue,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use afya_core::{
  element::{
    self, CategoryCombo, DataElement, NewDataElement, check_sql_safe,
  },
  orgunit::{OrgUnit, normalize_segment, path_key},
  period::{Granularity, Period},
  query::{DataQuery, OrgUnitRef, QueryRow},
  store::{ElementMeta, HmisStore, ViewRow},
  validation::{Comparator, NewValidationRule, ValidationRule, view_name},
  value::{NewDataValue, SourceDocument},
};

use crate::{
  Error, Result,
  hierarchy::{
    PathCache, ancestor_names, delete_subtree, fetch_child, fetch_org_unit,
    insert_child, org_unit_from_row,
  },
  schema::SCHEMA,
  sqlgen::{self, CalcField},
  validation::resolve_expressions,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Afya HMIS store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted, and the
/// memoized path cache is shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn:  tokio_rusqlite::Connection,
  cache: Arc<PathCache>,
}

const OU_COLUMNS: &str = "id, name, parent_id, lft, rght, level";
const DE_COLUMNS: &str =
  "id, name, alias, value_type, value_min, value_max, aggregation_method";

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self {
      conn,
      cache: Arc::new(PathCache::default()),
    };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self {
      conn,
      cache: Arc::new(PathCache::default()),
    };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Test-only escape hatch: run arbitrary SQL and read the rows back as
  /// JSON objects keyed by column name.
  #[cfg(test)]
  pub(crate) async fn query_sql(&self, sql: String) -> Result<Vec<ViewRow>> {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let column_names: Vec<String> =
          stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
          let mut object = serde_json::Map::new();
          for (i, column) in column_names.iter().enumerate() {
            object.insert(column.clone(), sql_value_to_json(row.get_ref(i)?));
          }
          out.push(object);
        }
        Ok(out)
      })
      .await?;
    Ok(rows)
  }

  /// Run several upserts inside one transaction — the atomic-batch import
  /// mode. With the default row-autonomous mode callers simply loop over
  /// [`HmisStore::upsert_value`].
  pub async fn upsert_values_atomic(
    &self,
    values: Vec<NewDataValue>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for value in &values {
          upsert_value_sync(&tx, value)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Sync helpers (run inside Connection::call) ──────────────────────────────

fn element_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DataElement> {
  let decimal = |idx: usize| -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| Decimal::from_str(&s).ok()))
  };
  let value_type: String = row.get(3)?;
  // 'sum' is the only aggregation method currently stored.
  let _method: String = row.get(6)?;
  Ok(DataElement {
    id:                 row.get(0)?,
    name:               row.get(1)?,
    alias:              row.get(2)?,
    value_type:         match value_type.as_str() {
      "percentage" => element::ValueType::Percentage,
      _ => element::ValueType::Number,
    },
    value_min:          decimal(4)?,
    value_max:          decimal(5)?,
    aggregation_method: element::AggregationMethod::Sum,
  })
}

fn find_element_sync(
  conn: &Connection,
  name: &str,
) -> rusqlite::Result<Option<DataElement>> {
  conn
    .query_row(
      &format!(
        "SELECT {DE_COLUMNS} FROM data_elements
         WHERE name = ?1 COLLATE NOCASE OR alias = ?1 COLLATE NOCASE"
      ),
      params![name],
      element_from_row,
    )
    .optional()
}

/// Split a period into the three identifier columns; exactly one is Some.
fn period_columns(
  period: Period,
) -> (Option<String>, Option<String>, Option<String>) {
  match period.granularity() {
    Granularity::Year => (Some(period.iso()), None, None),
    Granularity::Quarter => (None, Some(period.iso()), None),
    Granularity::Month => (None, None, Some(period.iso())),
  }
}

fn upsert_value_sync(
  conn: &Connection,
  value: &NewDataValue,
) -> rusqlite::Result<()> {
  let (year, quarter, month) = period_columns(value.period);
  let conflict = match value.period.granularity() {
    Granularity::Year => "(data_element_id, category_combo_id, org_unit_id, year) WHERE year IS NOT NULL",
    Granularity::Quarter => "(data_element_id, category_combo_id, org_unit_id, quarter) WHERE quarter IS NOT NULL",
    Granularity::Month => "(data_element_id, category_combo_id, org_unit_id, month) WHERE month IS NOT NULL",
  };
  let sql = format!(
    "INSERT INTO data_values (
       data_element_id, category_combo_id, org_unit_id, site_str,
       numeric_value, year, quarter, month, source_document_id
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
     ON CONFLICT {conflict} DO UPDATE SET
       numeric_value = excluded.numeric_value,
       site_str = excluded.site_str,
       source_document_id = excluded.source_document_id"
  );
  conn.execute(
    &sql,
    params![
      value.data_element_id,
      value.category_combo_id,
      value.org_unit_id,
      value.site_str,
      value.numeric_value.to_string(),
      year,
      quarter,
      month,
      value.source_document_id,
    ],
  )?;
  Ok(())
}

/// Derive [`ElementMeta`] for one element from its recorded facts.
/// No facts at all: deepest level in the tree, monthly granularity.
fn element_meta_sync(
  conn: &Connection,
  element: &DataElement,
) -> rusqlite::Result<ElementMeta> {
  let own_level: Option<u32> = conn.query_row(
    "SELECT MIN(ou.level) FROM data_values dv
     JOIN org_units ou ON ou.id = dv.org_unit_id
     WHERE dv.data_element_id = ?1",
    params![element.id],
    |r| r.get(0),
  )?;
  let own_level = match own_level {
    Some(level) => level,
    None => conn
      .query_row("SELECT MAX(level) FROM org_units", [], |r| r.get(0))
      .optional()?
      .flatten()
      .unwrap_or(0),
  };

  let has = |column: &str| -> rusqlite::Result<bool> {
    conn.query_row(
      &format!(
        "SELECT EXISTS(SELECT 1 FROM data_values
         WHERE data_element_id = ?1 AND {column} IS NOT NULL)"
      ),
      params![element.id],
      |r| r.get(0),
    )
  };
  let own_granularity = if has("year")? {
    Granularity::Year
  } else if has("quarter")? {
    Granularity::Quarter
  } else {
    Granularity::Month
  };

  Ok(ElementMeta {
    id: element.id,
    name: element.name.clone(),
    alias: element.alias.clone(),
    own_level,
    own_granularity,
  })
}

fn rule_from_row(
  conn: &Connection,
  row: &rusqlite::Row<'_>,
) -> rusqlite::Result<ValidationRule> {
  let id: i64 = row.get(0)?;
  let operator: String = row.get(3)?;
  let mut stmt = conn.prepare(
    "SELECT data_element_id FROM validation_rule_elements
     WHERE rule_id = ?1 ORDER BY data_element_id",
  )?;
  let element_ids = stmt
    .query_map(params![id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(ValidationRule {
    id,
    name: row.get(1)?,
    left_expr: row.get(2)?,
    comparator: Comparator::parse(&operator).unwrap_or(Comparator::Eq),
    right_expr: row.get(4)?,
    resolved: row.get::<_, i64>(5)? != 0,
    data_element_ids: element_ids,
  })
}

fn sql_value_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
  use rusqlite::types::ValueRef;
  match value {
    ValueRef::Null => serde_json::Value::Null,
    ValueRef::Integer(i) => serde_json::Value::from(i),
    ValueRef::Real(f) => serde_json::Value::from(f),
    ValueRef::Text(t) => {
      serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
    }
    ValueRef::Blob(_) => serde_json::Value::Null,
  }
}

// ─── HmisStore impl ──────────────────────────────────────────────────────────

impl HmisStore for SqliteStore {
  type Error = Error;

  // ── Org units ─────────────────────────────────────────────────────────────

  async fn lookup_or_create_path(&self, segments: &[String]) -> Result<OrgUnit> {
    let normalized: Vec<String> = segments
      .iter()
      .map(|s| normalize_segment(s))
      .filter(|s| !s.is_empty())
      .collect();
    if normalized.is_empty() {
      return Err(Error::Core(afya_core::Error::EmptyPath));
    }

    let key = path_key(&normalized);
    if let Some(id) = self.cache.get(&key) {
      // A stale hit (node deleted behind our back) falls through to a
      // fresh walk.
      if let Some(unit) = self.org_unit(id).await? {
        return Ok(unit);
      }
    }

    let walk = normalized.clone();
    let unit = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut parent: Option<OrgUnit> = None;
        for segment in &walk {
          let found = fetch_child(&tx, parent.as_ref().map(|p| p.id), segment)?;
          let node = match found {
            Some(existing) => existing,
            None => insert_child(&tx, parent.as_ref(), segment)?,
          };
          parent = Some(node);
        }
        tx.commit()?;
        Ok(parent)
      })
      .await?
      .ok_or(Error::Core(afya_core::Error::EmptyPath))?;

    self.cache.put(key, unit.id);
    Ok(unit)
  }

  async fn org_unit(&self, id: i64) -> Result<Option<OrgUnit>> {
    let unit = self.conn.call(move |conn| Ok(fetch_org_unit(conn, id)?)).await?;
    Ok(unit)
  }

  async fn org_unit_by_name(&self, name: &str) -> Result<Option<OrgUnit>> {
    let name = normalize_segment(name);
    let unit = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {OU_COLUMNS} FROM org_units
                 WHERE name = ?1 COLLATE NOCASE ORDER BY lft LIMIT 1"
              ),
              params![name],
              org_unit_from_row,
            )
            .optional()?,
        )
      })
      .await?;
    Ok(unit)
  }

  async fn org_units_at_level(&self, level: u32) -> Result<Vec<OrgUnit>> {
    let units = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OU_COLUMNS} FROM org_units WHERE level = ?1 ORDER BY name"
        ))?;
        let units = stmt
          .query_map(params![level], org_unit_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(units)
      })
      .await?;
    Ok(units)
  }

  async fn delete_org_unit(&self, id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let Some(unit) = fetch_org_unit(&tx, id)? else {
          return Ok(false);
        };
        delete_subtree(&tx, &unit)?;
        tx.commit()?;
        Ok(true)
      })
      .await?
      .then_some(())
      .ok_or(Error::Core(afya_core::Error::OrgUnitNotFound(id)))?;

    // Structural change: the memoized paths may now dangle.
    self.cache.clear();
    Ok(())
  }

  // ── Elements and combos ───────────────────────────────────────────────────

  async fn find_element(&self, name: &str) -> Result<Option<DataElement>> {
    let name = name.to_string();
    let element = self
      .conn
      .call(move |conn| Ok(find_element_sync(conn, &name)?))
      .await?;
    Ok(element)
  }

  async fn create_element(&self, input: NewDataElement) -> Result<DataElement> {
    check_sql_safe(&input.name).map_err(Error::Core)?;
    if let Some(alias) = &input.alias {
      check_sql_safe(alias).map_err(Error::Core)?;
    }

    let element = self
      .conn
      .call(move |conn| {
        // Cross-field collision: the new name/alias may equal no existing
        // name *or* alias, case-insensitively.
        let mut candidates = vec![input.name.clone()];
        candidates.extend(input.alias.clone());
        for candidate in &candidates {
          let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM data_elements
             WHERE name = ?1 COLLATE NOCASE OR alias = ?1 COLLATE NOCASE)",
            params![candidate],
            |r| r.get(0),
          )?;
          if taken {
            return Ok(Err(candidate.clone()));
          }
        }

        let value_type = match input.value_type {
          element::ValueType::Number => "number",
          element::ValueType::Percentage => "percentage",
        };
        conn.execute(
          "INSERT INTO data_elements
             (name, alias, value_type, value_min, value_max, aggregation_method)
           VALUES (?1, ?2, ?3, ?4, ?5, 'sum')",
          params![
            input.name,
            input.alias,
            value_type,
            input.value_min.map(|d| d.to_string()),
            input.value_max.map(|d| d.to_string()),
          ],
        )?;
        let id = conn.last_insert_rowid();
        let element = conn.query_row(
          &format!("SELECT {DE_COLUMNS} FROM data_elements WHERE id = ?1"),
          params![id],
          element_from_row,
        )?;
        Ok(Ok(element))
      })
      .await?;

    element.map_err(|name| Error::Core(afya_core::Error::NameCollision(name)))
  }

  async fn ensure_element(&self, name: &str) -> Result<DataElement> {
    if let Some(existing) = self.find_element(name).await? {
      return Ok(existing);
    }
    self.create_element(NewDataElement::named(name.trim())).await
  }

  async fn ensure_combo(&self, categories: &[String]) -> Result<CategoryCombo> {
    let name = element::combo_name(categories);
    let categories: Vec<String> =
      categories.iter().map(|c| c.trim().to_string()).collect();

    let combo = self
      .conn
      .call(move |conn| {
        let existing: Option<(i64, String)> = conn
          .query_row(
            "SELECT id, name FROM category_combos WHERE name = ?1 COLLATE NOCASE",
            params![name],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        if let Some((id, name)) = existing {
          return Ok(CategoryCombo { id, name });
        }

        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO category_combos (name) VALUES (?1)",
          params![name],
        )?;
        let combo_id = tx.last_insert_rowid();
        for category in &categories {
          tx.execute(
            "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
            params![category],
          )?;
          let category_id: i64 = tx.query_row(
            "SELECT id FROM categories WHERE name = ?1 COLLATE NOCASE",
            params![category],
            |r| r.get(0),
          )?;
          tx.execute(
            "INSERT OR IGNORE INTO combo_categories (combo_id, category_id)
             VALUES (?1, ?2)",
            params![combo_id, category_id],
          )?;
        }
        tx.commit()?;
        Ok(CategoryCombo {
          id:   combo_id,
          name,
        })
      })
      .await?;
    Ok(combo)
  }

  // ── Facts ─────────────────────────────────────────────────────────────────

  async fn upsert_value(&self, value: NewDataValue) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        upsert_value_sync(conn, &value)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_values(&self, query: &DataQuery) -> Result<Vec<QueryRow>> {
    // Resolve the org-unit scope first; an explicitly scoped query that
    // resolves to nothing returns no rows (not an error).
    let mut ranges: Vec<(i64, i64)> = Vec::new();
    for unit_ref in &query.org_units {
      let resolved = match unit_ref {
        OrgUnitRef::Id(id) => self.org_unit(*id).await?,
        OrgUnitRef::Name(name) => self.org_unit_by_name(name).await?,
      };
      if let Some(unit) = resolved {
        ranges.push((unit.lft, unit.rght));
      }
    }
    if !query.org_units.is_empty() && ranges.is_empty() {
      return Ok(Vec::new());
    }

    let elements = query.elements.clone();
    let periods = query.periods.clone();

    let rows = self
      .conn
      .call(move |conn| {
        let mut conds: Vec<String> = Vec::new();
        let mut binds: Vec<SqlValue> = Vec::new();

        if !elements.is_empty() {
          let ors = elements
            .iter()
            .map(|name| {
              binds.push(SqlValue::Text(name.clone()));
              let n = binds.len();
              binds.push(SqlValue::Text(name.clone()));
              let a = binds.len();
              format!(
                "de.name = ?{n} COLLATE NOCASE OR de.alias = ?{a} COLLATE NOCASE"
              )
            })
            .collect::<Vec<_>>()
            .join(" OR ");
          conds.push(format!("({ors})"));
        }

        if !ranges.is_empty() {
          let ors = ranges
            .iter()
            .map(|(lft, rght)| {
              binds.push(SqlValue::Integer(*lft));
              let l = binds.len();
              binds.push(SqlValue::Integer(*rght));
              let r = binds.len();
              format!("(ou.lft >= ?{l} AND ou.rght <= ?{r})")
            })
            .collect::<Vec<_>>()
            .join(" OR ");
          conds.push(format!("({ors})"));
        }

        if !periods.is_empty() {
          let ors = periods
            .iter()
            .map(|p| {
              let column = match p.granularity() {
                Granularity::Month => "dv.month",
                Granularity::Quarter => "dv.quarter",
                Granularity::Year => "dv.year",
              };
              binds.push(SqlValue::Text(p.iso()));
              format!("{column} = ?{}", binds.len())
            })
            .collect::<Vec<_>>()
            .join(" OR ");
          conds.push(format!("({ors})"));
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT de.name, cc.name, dv.org_unit_id, ou.lft, ou.rght,
                  COALESCE(dv.month, dv.quarter, dv.year), dv.numeric_value
           FROM data_values dv
           JOIN data_elements de ON de.id = dv.data_element_id
           JOIN category_combos cc ON cc.id = dv.category_combo_id
           JOIN org_units ou ON ou.id = dv.org_unit_id
           {where_clause}
           ORDER BY ou.lft, de.name, cc.name"
        );

        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
          .query_map(params_from_iter(binds), |row| {
            Ok((
              row.get::<_, String>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, i64>(2)?,
              row.get::<_, i64>(3)?,
              row.get::<_, i64>(4)?,
              row.get::<_, String>(5)?,
              row.get::<_, String>(6)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        // Annotate each row with its root-down org-unit path.
        let mut paths: std::collections::HashMap<i64, Vec<String>> =
          std::collections::HashMap::new();
        let mut rows = Vec::with_capacity(raw.len());
        for (de_name, category, org_unit_id, lft, rght, period, value) in raw {
          if !paths.contains_key(&org_unit_id) {
            paths.insert(org_unit_id, ancestor_names(conn, lft, rght)?);
          }
          rows.push((de_name, category, org_unit_id, period, value));
        }
        Ok((rows, paths))
      })
      .await?;

    let (raw, paths) = rows;
    raw
      .into_iter()
      .map(|(de_name, category, org_unit_id, period, value)| {
        let value = Decimal::from_str(&value)
          .map_err(|_| Error::DecimalParse(value.clone()))?;
        Ok(QueryRow {
          de_name,
          category,
          org_unit_id,
          path: paths.get(&org_unit_id).cloned().unwrap_or_default(),
          period,
          value,
        })
      })
      .collect()
  }

  async fn element_metadata(&self, names: &[String]) -> Result<Vec<ElementMeta>> {
    let names = names.to_vec();
    let metas = self
      .conn
      .call(move |conn| {
        let mut metas = Vec::new();
        for name in &names {
          if let Some(element) = find_element_sync(conn, name)? {
            metas.push(element_meta_sync(conn, &element)?);
          }
        }
        Ok(metas)
      })
      .await?;
    Ok(metas)
  }

  // ── Documents ─────────────────────────────────────────────────────────────

  async fn register_document(&self, original_name: &str) -> Result<SourceDocument> {
    let original_name = original_name.to_string();
    let extension = Path::new(&original_name)
      .extension()
      .map(|e| format!(".{}", e.to_string_lossy()))
      .unwrap_or_default();
    let stored_name = format!("{}{extension}", Uuid::new_v4());
    let uploaded_at = Utc::now();
    let at_str = uploaded_at.to_rfc3339();

    let document = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO source_documents (original_name, stored_name, uploaded_at)
           VALUES (?1, ?2, ?3)",
          params![original_name, stored_name, at_str],
        )?;
        Ok(SourceDocument {
          id: conn.last_insert_rowid(),
          original_name,
          stored_name,
          uploaded_at,
        })
      })
      .await?;
    Ok(document)
  }

  // ── Validation rules ──────────────────────────────────────────────────────

  async fn save_validation_rule(
    &self,
    input: NewValidationRule,
  ) -> Result<ValidationRule> {
    // Phase 1: persist the rule row, attempt resolution, sync the element
    // set. All of it is one synchronous database round-trip.
    let op = input.comparator;
    let prepared = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rule_id: i64 = tx.query_row(
          "INSERT INTO validation_rules (name, left_expr, operator, right_expr)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(name) DO UPDATE SET
             left_expr = excluded.left_expr,
             operator = excluded.operator,
             right_expr = excluded.right_expr
           RETURNING id",
          params![
            input.name,
            input.left_expr,
            op.as_sql(),
            input.right_expr
          ],
          |r| r.get(0),
        )?;

        let mut stmt =
          tx.prepare("SELECT id, name, alias FROM data_elements")?;
        let elements = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<(i64, String, Option<String>)>>>()?;
        drop(stmt);

        let resolution =
          resolve_expressions(&elements, &input.left_expr, &input.right_expr);

        let prepared = match resolution {
          None => {
            // Unresolved: leave the previous view and element set alone.
            tx.execute(
              "UPDATE validation_rules SET resolved = 0 WHERE id = ?1",
              params![rule_id],
            )?;
            None
          }
          Some(resolution) => {
            // Diff-sync the rule↔element associations.
            let keep = resolution
              .element_ids
              .iter()
              .map(i64::to_string)
              .collect::<Vec<_>>()
              .join(", ");
            tx.execute(
              &format!(
                "DELETE FROM validation_rule_elements
                 WHERE rule_id = ?1 AND data_element_id NOT IN ({keep})"
              ),
              params![rule_id],
            )?;
            for element_id in &resolution.element_ids {
              tx.execute(
                "INSERT OR IGNORE INTO validation_rule_elements
                 (rule_id, data_element_id) VALUES (?1, ?2)",
                params![rule_id, element_id],
              )?;
            }
            tx.execute(
              "UPDATE validation_rules SET resolved = 1 WHERE id = ?1",
              params![rule_id],
            )?;

            // Metadata for the referenced elements, in reference order.
            let mut metas = Vec::new();
            for element_id in &resolution.element_ids {
              let element = tx.query_row(
                &format!("SELECT {DE_COLUMNS} FROM data_elements WHERE id = ?1"),
                params![element_id],
                element_from_row,
              )?;
              metas.push(element_meta_sync(&tx, &element)?);
            }
            Some((resolution, metas))
          }
        };

        let rule = tx.query_row(
          "SELECT id, name, left_expr, operator, right_expr, resolved
           FROM validation_rules WHERE id = ?1",
          params![rule_id],
          |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
              row.get::<_, String>(3)?,
              row.get::<_, String>(4)?,
              row.get::<_, i64>(5)?,
            ))
          },
        )?;
        tx.commit()?;
        Ok((rule, prepared))
      })
      .await?;

    let ((rule_id, name, left_expr, operator, right_expr, resolved), prepared) =
      prepared;

    // Phase 2: (re)create the backing view when resolution succeeded.
    let element_ids;
    if let Some((resolution, metas)) = prepared {
      element_ids = resolution.element_ids.clone();
      let target_level =
        metas.iter().map(|m| m.own_level).min().unwrap_or(0);
      let target_gran = metas
        .iter()
        .map(|m| m.own_granularity)
        .max()
        .unwrap_or(Granularity::Month);

      let calc = CalcField::new(format!(
        "({}) {} ({})",
        resolution.left,
        op.as_sql(),
        resolution.right
      ));
      let select =
        sqlgen::pivot_query(&metas, target_level, target_gran, &[calc], &[])?;
      let view = view_name(rule_id);
      let ddl = format!(
        "DROP VIEW IF EXISTS {view};\nCREATE VIEW {view} AS\n{select};"
      );
      self
        .conn
        .call(move |conn| {
          conn.execute_batch(&ddl)?;
          Ok(())
        })
        .await?;
      tracing::debug!(rule = %name, view = %view_name(rule_id), "validation view recreated");
    } else {
      tracing::debug!(rule = %name, "validation rule left unresolved");
      // Report the previous associations.
      element_ids = self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT data_element_id FROM validation_rule_elements
             WHERE rule_id = ?1 ORDER BY data_element_id",
          )?;
          let ids = stmt
            .query_map(params![rule_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          Ok(ids)
        })
        .await?;
    }

    Ok(ValidationRule {
      id: rule_id,
      name,
      left_expr,
      comparator: Comparator::parse(&operator).unwrap_or(op),
      right_expr,
      resolved: resolved != 0,
      data_element_ids: element_ids,
    })
  }

  async fn list_validation_rules(&self) -> Result<Vec<ValidationRule>> {
    let rules = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, name, left_expr, operator, right_expr, resolved
           FROM validation_rules ORDER BY name",
        )?;
        let mut rows = stmt.query([])?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next()? {
          rules.push(rule_from_row(conn, row)?);
        }
        Ok(rules)
      })
      .await?;
    Ok(rules)
  }

  async fn run_validation_rule(
    &self,
    rule_id: i64,
    periods: &[Period],
  ) -> Result<Vec<ViewRow>> {
    let periods = periods.to_vec();
    let rows = self
      .conn
      .call(move |conn| {
        let resolved: Option<bool> = conn
          .query_row(
            "SELECT resolved FROM validation_rules WHERE id = ?1",
            params![rule_id],
            |r| Ok(r.get::<_, i64>(0)? != 0),
          )
          .optional()?;
        let Some(resolved) = resolved else {
          return Ok(None);
        };
        if !resolved {
          return Ok(Some(Vec::new()));
        }

        let mut sql = format!("SELECT * FROM {}", view_name(rule_id));
        if let Some(clause) = sqlgen::period_where(&periods) {
          sql.push_str(" WHERE ");
          sql.push_str(&clause);
        }

        let mut stmt = conn.prepare(&sql)?;
        let column_names: Vec<String> =
          stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
          let mut object = serde_json::Map::new();
          for (i, column) in column_names.iter().enumerate() {
            object.insert(column.clone(), sql_value_to_json(row.get_ref(i)?));
          }
          out.push(object);
        }
        Ok(Some(out))
      })
      .await?;

    rows.ok_or(Error::RuleNotFound(rule_id))
  }
}
