//! Legend sets — the colour-banding layer of a scorecard — and their
//! translation into spreadsheet conditional-formatting rules.

use rust_xlsxwriter::{
  Color, ConditionalFormatCell, ConditionalFormatCellRule, Format,
};
use serde::{Deserialize, Serialize};

use crate::excel::column_name;

// ─── Colours ─────────────────────────────────────────────────────────────────

/// Symbolic colours a legend may name instead of a raw hex value.
const COLOR_TABLE: &[(&str, u32)] = &[
  ("green", 0x00B050),
  ("lightgreen", 0x92D050),
  ("yellow", 0xFFFF00),
  ("orange", 0xFFC000),
  ("red", 0xFF0000),
  ("grey", 0xBFBFBF),
  ("gray", 0xBFBFBF),
  ("white", 0xFFFFFF),
  ("black", 0x000000),
];

/// Colours dark enough that the cell font flips to white.
const LOW_CONTRAST: &[u32] = &[0x00B050, 0xFF0000, 0x000000];

/// Resolve a legend colour: symbolic name (case-insensitive) or raw hex
/// like `"FFC000"`. Unrecognised input falls back to white.
fn resolve_color(name: &str) -> u32 {
  let lower = name.trim().to_lowercase();
  if let Some((_, rgb)) = COLOR_TABLE.iter().find(|(n, _)| *n == lower) {
    return *rgb;
  }
  u32::from_str_radix(lower.trim_start_matches('#'), 16).unwrap_or(0xFFFFFF)
}

// ─── Legends ─────────────────────────────────────────────────────────────────

/// One colour band over the half-open interval `[start, end)`. A `None`
/// bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
  pub color: String,
  pub start: Option<f64>,
  pub end:   Option<f64>,
}

/// The columns of the rendered grid one legend set paints, as zero-based
/// worksheet column indices (`first..=last`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpan {
  pub first: u16,
  pub last:  u16,
}

/// A named set of bands plus the column spans it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendSet {
  pub name:     String,
  pub legends:  Vec<Legend>,
  pub mappings: Vec<ColumnSpan>,
}

/// Data rows extend at most this far; conditional formats cover the whole
/// stripe rather than being re-emitted per render.
const LAST_FORMAT_ROW: u32 = 16384;

impl LegendSet {
  /// The bands ordered for emission: by start (unbounded first), then end
  /// (unbounded last).
  pub fn legends(&self) -> Vec<&Legend> {
    let mut out: Vec<&Legend> = self.legends.iter().collect();
    out.sort_by(|a, b| {
      let a_key = (
        a.start.unwrap_or(f64::NEG_INFINITY),
        a.end.unwrap_or(f64::INFINITY),
      );
      let b_key = (
        b.start.unwrap_or(f64::NEG_INFINITY),
        b.end.unwrap_or(f64::INFINITY),
      );
      a_key
        .0
        .total_cmp(&b_key.0)
        .then(a_key.1.total_cmp(&b_key.1))
    });
    out
  }

  /// A1-style ranges the set paints, e.g. `"E2:G16384"`.
  /// `skip_header` starts the stripe below the header row.
  pub fn excel_ranges(&self, skip_header: bool) -> Vec<String> {
    let first_row = if skip_header { 2 } else { 1 };
    self
      .mappings
      .iter()
      .map(|span| {
        format!(
          "{}{first_row}:{}{LAST_FORMAT_ROW}",
          column_name(u32::from(span.first)),
          column_name(u32::from(span.last)),
        )
      })
      .collect()
  }

  /// The worksheet rules for this set, in application order: one
  /// ignore-blanks rule (stop-if-true on empty cells) followed by one rule
  /// per band.
  pub fn conditional_formats(&self) -> Vec<ConditionalFormatCell> {
    let mut rules = vec![
      ConditionalFormatCell::new()
        .set_rule(ConditionalFormatCellRule::EqualTo(String::new()))
        .set_stop_if_true(true),
    ];

    for legend in self.legends() {
      let rgb = resolve_color(&legend.color);
      let mut format = Format::new().set_bold().set_background_color(Color::RGB(rgb));
      if LOW_CONTRAST.contains(&rgb) {
        format = format.set_font_color(Color::White);
      }

      let cell = ConditionalFormatCell::new().set_format(format);
      let cell = match (legend.start, legend.end) {
        (None, Some(end)) => {
          cell.set_rule(ConditionalFormatCellRule::LessThan(end))
        }
        (Some(start), None) => {
          cell.set_rule(ConditionalFormatCellRule::GreaterThanOrEqualTo(start))
        }
        (Some(start), Some(end)) => {
          cell.set_rule(ConditionalFormatCellRule::Between(start, end))
        }
        // A fully unbounded band paints everything that got this far. The
        // blank guard above already stopped empty cells, so "not equal to
        // the empty string" always fires; infinities are not representable
        // as criteria values in the file format.
        (None, None) => {
          cell.set_rule(ConditionalFormatCellRule::NotEqualTo(String::new()))
        }
      };
      rules.push(cell);
    }

    rules
  }

  /// The row/column rectangles matching [`Self::excel_ranges`], for the
  /// numeric `add_conditional_format` API.
  pub fn format_rects(&self, skip_header: bool) -> Vec<(u32, u16, u32, u16)> {
    let first_row = if skip_header { 1 } else { 0 };
    self
      .mappings
      .iter()
      .map(|span| (first_row, span.first, LAST_FORMAT_ROW - 1, span.last))
      .collect()
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn set() -> LegendSet {
    LegendSet {
      name:     "coverage".into(),
      legends:  vec![
        Legend {
          color: "green".into(),
          start: Some(80.0),
          end:   None,
        },
        Legend {
          color: "red".into(),
          start: None,
          end:   Some(50.0),
        },
        Legend {
          color: "yellow".into(),
          start: Some(50.0),
          end:   Some(80.0),
        },
      ],
      mappings: vec![ColumnSpan { first: 4, last: 6 }],
    }
  }

  #[test]
  fn legends_sort_unbounded_start_first() {
    let set = set();
    let ordered: Vec<&str> =
      set.legends().iter().map(|l| l.color.as_str()).collect();
    assert_eq!(ordered, vec!["red", "yellow", "green"]);
  }

  #[test]
  fn every_value_falls_in_exactly_one_band() {
    let set = set();
    let bands = set.legends();
    for value in [-10.0, 0.0, 49.9, 50.0, 79.9, 80.0, 100.0, 500.0] {
      let hits = bands
        .iter()
        .filter(|l| {
          l.start.is_none_or(|s| value >= s) && l.end.is_none_or(|e| value < e)
        })
        .count();
      assert_eq!(hits, 1, "value {value} matched {hits} bands");
    }
  }

  #[test]
  fn excel_ranges_span_data_rows() {
    assert_eq!(set().excel_ranges(true), vec!["E2:G16384"]);
    assert_eq!(set().excel_ranges(false), vec!["E1:G16384"]);
  }

  #[test]
  fn rule_emission_leads_with_the_blank_guard() {
    let rules = set().conditional_formats();
    // Blank guard + one per band.
    assert_eq!(rules.len(), 4);
  }

  #[test]
  fn unbounded_band_emits_a_catch_all_rule() {
    let set = LegendSet {
      name:     "default".into(),
      legends:  vec![Legend {
        color: "grey".into(),
        start: None,
        end:   None,
      }],
      mappings: vec![ColumnSpan { first: 1, last: 1 }],
    };
    // Blank guard plus the catch-all; construction must not involve
    // infinite criteria values.
    assert_eq!(set.conditional_formats().len(), 2);
  }

  #[test]
  fn colors_resolve_symbolically_and_as_hex() {
    assert_eq!(resolve_color("GREEN"), 0x00B050);
    assert_eq!(resolve_color("ffc000"), 0xFFC000);
    assert_eq!(resolve_color("#92d050"), 0x92D050);
    assert_eq!(resolve_color("no-such-colour"), 0xFFFFFF);
  }
}
