//! Org units — the administrative hierarchy facts are reported against.
//!
//! The tree is materialised as a nested set (`lft`/`rght`/`level`), so
//! "everything under this district" is a single range-containment predicate
//! instead of a recursive walk. Maintenance of the indices lives in the
//! storage backend; this module holds the node type, the path-segment
//! normaliser and the depth→semantic-level-name mapping.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ─── Node ────────────────────────────────────────────────────────────────────

/// A node in the administrative hierarchy (country → district → subcounty →
/// facility). `(parent_id, name)` is unique case-insensitively; the node's
/// `[lft, rght]` range strictly contains exactly its descendants' ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
  pub id:        i64,
  pub name:      String,
  pub parent_id: Option<i64>,
  pub lft:       i64,
  pub rght:      i64,
  pub level:     u32,
}

impl OrgUnit {
  /// True when `other` lies inside this node's subtree (inclusive).
  pub fn contains(&self, other: &OrgUnit) -> bool {
    self.lft <= other.lft && other.rght <= self.rght
  }
}

// ─── Segment normalisation ───────────────────────────────────────────────────

static WHITESPACE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HEALTH_CENTRE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)\b(?:health\s+cent(?:re|er)|h/c|hc)\b\.?").unwrap()
});
static HC_ROMAN_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)\bHC\s+(i{1,3}|iv)\b").unwrap());

/// Canonical display form for one path segment: trim, collapse internal
/// whitespace, and normalise the health-centre spellings found in real
/// exports ("Kawaala Health Centre III", "Kawaala H/C iii" → "Kawaala HC III").
pub fn normalize_segment(raw: &str) -> String {
  let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ");
  let unified = HEALTH_CENTRE_RE.replace_all(&collapsed, "HC");
  HC_ROMAN_RE
    .replace_all(&unified, |caps: &regex::Captures| {
      format!("HC {}", caps[1].to_uppercase())
    })
    .into_owned()
}

/// Case-insensitive path-cache key for a normalised segment sequence.
pub fn path_key(segments: &[String]) -> String {
  segments
    .iter()
    .map(|s| s.to_lowercase())
    .collect::<Vec<_>>()
    .join("\u{1f}")
}

// ─── Level names ─────────────────────────────────────────────────────────────

/// Semantic names for hierarchy depths, used to label pivot columns and
/// report headers. Depths beyond the configured list fall back to
/// `"level_<n>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelNames(Vec<String>);

impl Default for LevelNames {
  fn default() -> Self {
    Self(
      ["Country", "District", "Subcounty", "Facility"]
        .map(String::from)
        .to_vec(),
    )
  }
}

impl LevelNames {
  pub fn new(names: Vec<String>) -> Self {
    Self(names)
  }

  /// Human label for a depth, e.g. `1` → `"District"`.
  pub fn name(&self, level: u32) -> String {
    self
      .0
      .get(level as usize)
      .cloned()
      .unwrap_or_else(|| format!("Level {level}"))
  }

  /// Machine field name for a depth, e.g. `1` → `"district"`.
  pub fn field(&self, level: u32) -> String {
    self.name(level).to_lowercase().replace(' ', "_")
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
