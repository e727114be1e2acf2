//! `afya` — HMIS scorecard server.
//!
//! # Usage
//!
//! ```
//! afya --config afya.toml
//! afya --import dhis_export.xlsx
//! ```

use std::{path::PathBuf, sync::Arc};

use afya_core::store::HmisStore as _;
use afya_import::{ImportSummary, read_workbook};
use afya_report::ReportDef;
use afya_server::{AppState, ServerConfig, api_router};
use afya_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "afya", about = "HMIS scorecard server")]
struct Args {
  /// Path to a TOML configuration file (default: ./afya.toml, optional).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Import a workbook into the database and exit instead of serving.
  #[arg(long, value_name = "FILE")]
  import: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();
  let config = ServerConfig::load(args.config.as_deref())
    .context("loading configuration")?;

  let store = SqliteStore::open(&config.db_path)
    .await
    .with_context(|| format!("opening database {}", config.db_path.display()))?;

  if let Some(path) = &args.import {
    let summary = import_workbook(&store, &config, path).await?;
    tracing::info!(
      written = summary.values_written,
      skipped_rows = summary.rows_skipped,
      skipped_cells = summary.cells_skipped,
      rules = summary.rules_saved,
      "import finished"
    );
    return Ok(());
  }

  let reports = load_reports(&config)?;
  let state = AppState {
    store:   Arc::new(store),
    reports: Arc::new(reports),
    levels:  Arc::new(config.level_names()),
  };

  let app = api_router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", config.host, config.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Run one workbook import, atomically or row-autonomously per the config.
async fn import_workbook(
  store: &SqliteStore,
  config: &ServerConfig,
  path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
  let data = read_workbook(path)
    .with_context(|| format!("reading workbook {}", path.display()))?;

  if config.atomic_import {
    // All values land in one transaction; any failure rolls the whole
    // workbook back.
    let document = store.register_document(&data.file_name).await?;
    let values = afya_import::resolve_values(
      store,
      &data,
      &config.root_org_unit,
      Some(document.id),
    )
    .await?;
    let mut summary = ImportSummary {
      values_written: values.len(),
      rows_skipped: data.skipped_rows,
      cells_skipped: data.skipped_cells,
      ..ImportSummary::default()
    };
    store.upsert_values_atomic(values).await?;
    afya_import::apply_rules(store, &data, &mut summary).await?;
    Ok(summary)
  } else {
    Ok(afya_import::apply_batch(store, &data, &config.root_org_unit).await?)
  }
}

/// Load the report definitions named by the config; a missing or absent
/// file means an empty report list, not a startup failure.
fn load_reports(config: &ServerConfig) -> anyhow::Result<Vec<ReportDef>> {
  let Some(path) = &config.reports_path else {
    return Ok(Vec::new());
  };
  let raw = match std::fs::read_to_string(path) {
    Ok(raw) => raw,
    Err(err) => {
      tracing::warn!(
        path = %path.display(),
        error = %err,
        "report definitions not loaded"
      );
      return Ok(Vec::new());
    }
  };
  serde_json::from_str(&raw)
    .with_context(|| format!("parsing report definitions {}", path.display()))
}
