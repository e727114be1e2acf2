//! Server configuration: a TOML file layered under `AFYA_*` environment
//! variables.

use std::path::{Path, PathBuf};

use afya_core::orgunit::LevelNames;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:          String,
  pub port:          u16,
  /// SQLite database file.
  pub db_path:       PathBuf,
  /// Org-unit segments every imported location path is rooted under.
  pub root_org_unit: Vec<String>,
  /// Semantic names per hierarchy depth, root first.
  pub level_names:   Vec<String>,
  /// Apply imports as one transaction instead of row-by-row.
  pub atomic_import: bool,
  /// JSON file holding the report definitions to serve.
  pub reports_path:  Option<PathBuf>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:          "127.0.0.1".to_string(),
      port:          3210,
      db_path:       PathBuf::from("afya.db"),
      root_org_unit: vec!["Uganda".to_string()],
      level_names:   ["Country", "District", "Subcounty", "Facility"]
        .map(String::from)
        .to_vec(),
      atomic_import: false,
      reports_path:  None,
    }
  }
}

impl ServerConfig {
  /// Load configuration: the given TOML file (or `./afya.toml` when none
  /// is given, missing tolerated), then `AFYA_*` environment overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
    let mut builder = Config::builder();
    builder = match path {
      Some(path) => builder.add_source(File::from(path)),
      None => builder.add_source(File::with_name("afya").required(false)),
    };
    builder
      .add_source(Environment::with_prefix("AFYA"))
      .build()?
      .try_deserialize()
  }

  pub fn level_names(&self) -> LevelNames {
    LevelNames::new(self.level_names.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_sensible() {
    let config = ServerConfig::default();
    assert_eq!(config.port, 3210);
    assert!(!config.atomic_import);
    assert_eq!(config.level_names().name(1), "District");
  }
}
