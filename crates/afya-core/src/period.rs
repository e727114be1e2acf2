//! Reporting-period grammar.
//!
//! Facts are recorded against exactly one of three granularities — month,
//! quarter or year — identified by canonical strings `YYYY-MM`, `YYYY-Qn`
//! and `YYYY`. Spreadsheet exports spell periods much more loosely
//! ("Oct 2016", "July to September 2016", "2016Q4"); [`Period::parse`]
//! accepts the loose forms, [`Period::parse_iso`] only the canonical ones.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ─── Granularity ─────────────────────────────────────────────────────────────

/// How much calendar time one fact row covers.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
  Month,
  Quarter,
  Year,
}

impl Granularity {
  /// Calendar months spanned by one period at this granularity.
  pub fn months(self) -> u32 {
    match self {
      Self::Month => 1,
      Self::Quarter => 3,
      Self::Year => 12,
    }
  }

  /// How many periods of `self` fit in one period of `coarser`.
  ///
  /// Used to rescale a coarser-granularity figure down onto a finer grid
  /// (an annual total estimated per quarter divides by 4).
  pub fn per(self, coarser: Granularity) -> u32 {
    coarser.months() / self.months()
  }
}

// ─── Period ──────────────────────────────────────────────────────────────────

/// A single reporting period at one of the three granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
  Year(i32),
  /// Year and quarter number (1..=4).
  Quarter(i32, u32),
  /// Year and month number (1..=12).
  Month(i32, u32),
}

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)^([a-z]+)\.?\s+to\s+[a-z]+\.?\s+(\d{4})$").unwrap()
});
static MONTH_NAME_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)^([a-z]+)\.?\s+(\d{4})$").unwrap());
static QUARTER_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)^(\d{4})-?Q([1-4])$").unwrap());
static YEAR_MONTH_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());
static YEAR_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(\d{4})$").unwrap());

/// Month number for an English month name or its 3-letter abbreviation
/// ("Sept" also accepted). Case-insensitive.
fn month_number(name: &str) -> Option<u32> {
  const NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
  ];
  let lower = name.to_lowercase();
  if lower.len() < 3 {
    return None;
  }
  NAMES
    .iter()
    .position(|full| full.starts_with(&lower) || lower == full[..3])
    .map(|i| i as u32 + 1)
}

impl Period {
  /// Parse a loosely-formatted spreadsheet period.
  ///
  /// Recognised, in precedence order:
  /// - `"July to September 2016"` — a month range; only the first month is
  ///   kept, matching what upstream reporting tools record for such rows.
  /// - `"Oct 2016"` / `"October 2016"`
  /// - `"2016-Q4"` / `"2016Q4"`
  /// - `"2016-10"`
  /// - `"2016"`
  ///
  /// Returns `None` when nothing matches; callers skip rather than error.
  pub fn parse(text: &str) -> Option<Period> {
    let text = text.trim();

    if let Some(caps) = RANGE_RE.captures(text) {
      let month = month_number(&caps[1])?;
      let year: i32 = caps[2].parse().ok()?;
      return Some(Period::Month(year, month));
    }
    if let Some(caps) = MONTH_NAME_RE.captures(text) {
      let month = month_number(&caps[1])?;
      let year: i32 = caps[2].parse().ok()?;
      return Some(Period::Month(year, month));
    }
    Self::parse_iso(text)
  }

  /// Parse only the canonical identifier grammar: `YYYY-MM`, `YYYY-Qn`,
  /// `YYYYQn` or `YYYY`.
  pub fn parse_iso(text: &str) -> Option<Period> {
    let text = text.trim();

    if let Some(caps) = QUARTER_RE.captures(text) {
      let year: i32 = caps[1].parse().ok()?;
      let quarter: u32 = caps[2].parse().ok()?;
      return Some(Period::Quarter(year, quarter));
    }
    if let Some(caps) = YEAR_MONTH_RE.captures(text) {
      let year: i32 = caps[1].parse().ok()?;
      let month: u32 = caps[2].parse().ok()?;
      if !(1..=12).contains(&month) {
        return None;
      }
      return Some(Period::Month(year, month));
    }
    if let Some(caps) = YEAR_RE.captures(text) {
      return Some(Period::Year(caps[1].parse().ok()?));
    }
    None
  }

  pub fn granularity(self) -> Granularity {
    match self {
      Period::Year(_) => Granularity::Year,
      Period::Quarter(..) => Granularity::Quarter,
      Period::Month(..) => Granularity::Month,
    }
  }

  pub fn year(self) -> i32 {
    match self {
      Period::Year(y) | Period::Quarter(y, _) | Period::Month(y, _) => y,
    }
  }

  /// Quarter number, derivable for quarter- and month-precision periods.
  pub fn quarter(self) -> Option<u32> {
    match self {
      Period::Year(_) => None,
      Period::Quarter(_, q) => Some(q),
      Period::Month(_, m) => Some((m + 2) / 3),
    }
  }

  /// First day of the year, quarter and month — each populated only as far
  /// as this period's precision goes, most-specific last.
  pub fn dates(self) -> (NaiveDate, Option<NaiveDate>, Option<NaiveDate>) {
    let year_start = NaiveDate::from_ymd_opt(self.year(), 1, 1)
      .unwrap_or(NaiveDate::MIN);
    let quarter_start = self.quarter().and_then(|q| {
      NaiveDate::from_ymd_opt(self.year(), (q - 1) * 3 + 1, 1)
    });
    let month_start = match self {
      Period::Month(y, m) => NaiveDate::from_ymd_opt(y, m, 1),
      _ => None,
    };
    (year_start, quarter_start, month_start)
  }

  /// `YYYY` — always available.
  pub fn year_str(self) -> String {
    format!("{:04}", self.year())
  }

  /// `YYYY-Qn` when quarter precision (or finer) is available.
  pub fn quarter_str(self) -> Option<String> {
    self.quarter().map(|q| format!("{:04}-Q{q}", self.year()))
  }

  /// `YYYY-MM` for month-precision periods.
  pub fn month_str(self) -> Option<String> {
    match self {
      Period::Month(y, m) => Some(format!("{y:04}-{m:02}")),
      _ => None,
    }
  }

  /// The single canonical identifier at this period's own granularity.
  pub fn iso(self) -> String {
    match self {
      Period::Year(_) => self.year_str(),
      Period::Quarter(..) => self.quarter_str().unwrap_or_default(),
      Period::Month(..) => self.month_str().unwrap_or_default(),
    }
  }

  /// All identifiers this period's precision warrants, coarsest first:
  /// a month yields year, quarter and month; a year only itself.
  pub fn iso_periods(self) -> Vec<String> {
    let mut out = vec![self.year_str()];
    if let Some(q) = self.quarter_str() {
      out.push(q);
    }
    if let Some(m) = self.month_str() {
      out.push(m);
    }
    out
  }
}

impl std::fmt::Display for Period {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.iso())
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
