//! The indicator-column header grammar.
//!
//! Spreadsheet headers carry noise the indicator name must be separated
//! from: a leading period prefix ("Oct 2016 ..." or "October to December
//! 2016 ...") left over from how source workbooks are assembled, and a
//! trailing disaggregation suffix drawn from a fixed category vocabulary
//! ("... Female, 15-19 Years").

use std::sync::LazyLock;

use regex::Regex;

/// The recognised disaggregation vocabulary: sexes and age bands. Anything
/// else at the end of a header is part of the indicator name.
pub const CATEGORY_VOCABULARY: &[&str] = &[
  "Male",
  "Female",
  "Under 5",
  "5 and Above",
  "0-4 Years",
  "5-14 Years",
  "15-19 Years",
  "20-24 Years",
  "25-29 Years",
  "25 Years and Above",
];

const MONTH: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may\
|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?\
|nov(?:ember)?|dec(?:ember)?";

static PERIOD_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
  let range = format!(r"(?:{MONTH})\.?\s+to\s+(?:{MONTH})\.?\s+\d{{4}}");
  let single = format!(r"(?:{MONTH})\.?(?:\s+\d{{4}})?");
  Regex::new(&format!(r"(?i)^(?:{range}|{single})\s+")).unwrap()
});

/// A parsed indicator column: the element name plus zero or more category
/// names in the order they appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
  pub element:    String,
  pub categories: Vec<String>,
}

fn collapse_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip one trailing vocabulary entry (and its separator) off `rest`,
/// returning the canonical vocabulary spelling when one matched.
fn strip_category_suffix(rest: &mut String) -> Option<&'static str> {
  // Longest entries first so "25 Years and Above" beats "5 and Above".
  let mut vocab: Vec<&'static str> = CATEGORY_VOCABULARY.to_vec();
  vocab.sort_by_key(|v| std::cmp::Reverse(v.len()));

  let lower = rest.to_lowercase();
  for entry in vocab {
    let entry_lower = entry.to_lowercase();
    if !lower.ends_with(&entry_lower) {
      continue;
    }
    let cut = rest.len() - entry.len();
    // The suffix must be separated from the name, not embedded in a word.
    let boundary = rest[..cut]
      .chars()
      .next_back()
      .is_some_and(|c| c == ',' || c.is_whitespace());
    if !boundary {
      continue;
    }
    rest.truncate(cut);
    let trimmed = rest.trim_end_matches([' ', ',']).len();
    rest.truncate(trimmed);
    return Some(entry);
  }
  None
}

/// Parse one raw header cell into element name + categories.
pub fn parse_header(raw: &str) -> ColumnHeader {
  let collapsed = collapse_whitespace(raw);
  let stripped = PERIOD_PREFIX_RE.replace(&collapsed, "");

  let mut rest = stripped.trim().to_string();
  let mut categories: Vec<String> = Vec::new();
  while let Some(category) = strip_category_suffix(&mut rest) {
    categories.push(category.to_string());
  }
  categories.reverse();

  ColumnHeader {
    element: rest,
    categories,
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_header_passes_through() {
    let h = parse_header("105-1 OPD Attendance");
    assert_eq!(h.element, "105-1 OPD Attendance");
    assert!(h.categories.is_empty());
  }

  #[test]
  fn month_prefix_is_stripped() {
    assert_eq!(parse_header("Oct 2016 ANC 1st Visit").element, "ANC 1st Visit");
    assert_eq!(parse_header("October ANC 1st Visit").element, "ANC 1st Visit");
  }

  #[test]
  fn month_range_prefix_is_stripped() {
    let h = parse_header("October to December 2016 ANC 4th Visit");
    assert_eq!(h.element, "ANC 4th Visit");
  }

  #[test]
  fn trailing_categories_split_off() {
    let h = parse_header("ANC 1st Visit Female, 15-19 Years");
    assert_eq!(h.element, "ANC 1st Visit");
    assert_eq!(h.categories, vec!["Female", "15-19 Years"]);
  }

  #[test]
  fn longest_category_wins() {
    let h = parse_header("Weight Checked 25 Years and Above");
    assert_eq!(h.element, "Weight Checked");
    assert_eq!(h.categories, vec!["25 Years and Above"]);
  }

  #[test]
  fn embedded_vocabulary_words_stay_in_the_name() {
    // "Under 5" appears mid-name, not as a suffix.
    let h = parse_header("Under 5 Clinic Visits");
    assert_eq!(h.element, "Under 5 Clinic Visits");
    assert!(h.categories.is_empty());
  }

  #[test]
  fn whitespace_is_collapsed() {
    let h = parse_header("  105-1   OPD   Attendance  Male ");
    assert_eq!(h.element, "105-1 OPD Attendance");
    assert_eq!(h.categories, vec!["Male"]);
  }
}
