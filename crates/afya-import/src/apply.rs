//! The batch driver: a parsed workbook applied to any store.

use afya_core::{
  element::DEFAULT_COMBO_ID,
  store::HmisStore,
  value::NewDataValue,
};

use crate::{
  Result,
  error::store_err,
  workbook::WorkbookData,
};

/// What one application run did, for logging and the HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub values_written:   usize,
  pub rows_skipped:     usize,
  pub cells_skipped:    usize,
  pub rules_saved:      usize,
  pub rules_unresolved: usize,
}

/// Resolve every cell of a parsed workbook into ready-to-upsert values:
/// get-or-create the org-unit paths (under `root`), elements and combos.
pub async fn resolve_values<S: HmisStore>(
  store: &S,
  data: &WorkbookData,
  root: &[String],
  source_document_id: Option<i64>,
) -> Result<Vec<NewDataValue>> {
  let mut values = Vec::new();

  for sheet in &data.sheets {
    // Resolve the sheet's columns once, rows share them.
    let mut columns = Vec::with_capacity(sheet.headers.len());
    for header in &sheet.headers {
      if header.element.is_empty() {
        columns.push(None);
        continue;
      }
      let element = store
        .ensure_element(&header.element)
        .await
        .map_err(store_err)?;
      let combo_id = if header.categories.is_empty() {
        DEFAULT_COMBO_ID
      } else {
        store
          .ensure_combo(&header.categories)
          .await
          .map_err(store_err)?
          .id
      };
      columns.push(Some((element.id, combo_id)));
    }

    for row in &sheet.rows {
      let segments: Vec<String> =
        root.iter().cloned().chain(row.location.iter().cloned()).collect();
      let unit =
        store.lookup_or_create_path(&segments).await.map_err(store_err)?;

      for (header_idx, value) in &row.cells {
        let Some(Some((element_id, combo_id))) = columns.get(*header_idx)
        else {
          continue;
        };
        values.push(NewDataValue {
          data_element_id: *element_id,
          category_combo_id: *combo_id,
          org_unit_id: unit.id,
          site_str: row.site_str.clone(),
          numeric_value: *value,
          period: row.period,
          source_document_id,
        });
      }
    }
  }

  Ok(values)
}

/// Save the workbook's validation rules, counting how many resolved.
pub async fn apply_rules<S: HmisStore>(
  store: &S,
  data: &WorkbookData,
  summary: &mut ImportSummary,
) -> Result<()> {
  for rule in &data.rules {
    let saved = store
      .save_validation_rule(rule.clone())
      .await
      .map_err(store_err)?;
    summary.rules_saved += 1;
    if !saved.resolved {
      summary.rules_unresolved += 1;
      tracing::warn!(rule = %saved.name, "validation rule did not resolve");
    }
  }
  Ok(())
}

/// Apply a parsed workbook row-autonomously: each value upserts on its
/// own, a failed upsert is logged and counted without aborting the rest.
/// (Atomic application goes through [`resolve_values`] plus a
/// backend-specific batch transaction instead.)
pub async fn apply_batch<S: HmisStore>(
  store: &S,
  data: &WorkbookData,
  root: &[String],
) -> Result<ImportSummary> {
  let document = store
    .register_document(&data.file_name)
    .await
    .map_err(store_err)?;

  let mut summary = ImportSummary {
    rows_skipped: data.skipped_rows,
    cells_skipped: data.skipped_cells,
    ..ImportSummary::default()
  };

  let values = resolve_values(store, data, root, Some(document.id)).await?;
  for value in values {
    match store.upsert_value(value).await {
      Ok(()) => summary.values_written += 1,
      Err(err) => {
        summary.cells_skipped += 1;
        tracing::warn!(error = %err, "value upsert failed");
      }
    }
  }

  apply_rules(store, data, &mut summary).await?;

  tracing::info!(
    document = %data.file_name,
    written = summary.values_written,
    skipped_rows = summary.rows_skipped,
    skipped_cells = summary.cells_skipped,
    rules = summary.rules_saved,
    "workbook applied"
  );
  Ok(summary)
}
