//! Expression resolution for validation rules.
//!
//! A rule's left/right expressions are free text referencing indicator
//! names or aliases ("Active on ART / ANC Attendance * 100"). Resolution
//! substitutes every reference with its pivot-column alias `de_<id>` and
//! verifies nothing unexplained remains; only then does the store
//! materialise the backing view. An expression that fails to resolve is a
//! user-correctable state, not an error — the rule stays inert.

use std::sync::LazyLock;

use regex::Regex;

// ─── Token catalogue ─────────────────────────────────────────────────────────

/// A matchable indicator token: the element id plus one of its names.
#[derive(Debug, Clone)]
pub(crate) struct ElementToken {
  pub id:   i64,
  pub text: String,
}

/// Build the token list for a set of elements (name and alias rows),
/// longest text first so that "Active on ART" wins over a bare "ART".
pub(crate) fn element_tokens(
  elements: &[(i64, String, Option<String>)],
) -> Vec<ElementToken> {
  let mut tokens: Vec<ElementToken> = Vec::new();
  for (id, name, alias) in elements {
    tokens.push(ElementToken {
      id:   *id,
      text: name.clone(),
    });
    if let Some(alias) = alias {
      tokens.push(ElementToken {
        id:   *id,
        text: alias.clone(),
      });
    }
  }
  tokens.sort_by(|a, b| b.text.len().cmp(&a.text.len()));
  tokens
}

// ─── Substitution ────────────────────────────────────────────────────────────

/// Byte length of a case-insensitive match of `needle_lower` at the start
/// of `haystack`, if any. Folding is done per haystack character, so the
/// returned length is always a char boundary even when lowercasing changes
/// byte counts (e.g. 'İ' folds to two code points).
fn ci_prefix_len(haystack: &str, needle_lower: &str) -> Option<usize> {
  let mut want = needle_lower.chars();
  let mut consumed = 0;
  for c in haystack.chars() {
    for folded in c.to_lowercase() {
      match want.next() {
        Some(w) if w == folded => {}
        // Mismatch, or the needle ends inside this character's folding.
        _ => return None,
      }
    }
    consumed += c.len_utf8();
    if want.as_str().is_empty() {
      return Some(consumed);
    }
  }
  None
}

/// Replace every case-insensitive occurrence of `needle` in `haystack`
/// with `replacement`.
fn replace_ci(haystack: &str, needle: &str, replacement: &str) -> String {
  let needle_lower: String =
    needle.chars().flat_map(char::to_lowercase).collect();
  let mut out = String::with_capacity(haystack.len());
  let mut rest = haystack;
  'scan: while !rest.is_empty() {
    for (pos, _) in rest.char_indices() {
      if let Some(len) = ci_prefix_len(&rest[pos..], &needle_lower) {
        out.push_str(&rest[..pos]);
        out.push_str(replacement);
        rest = &rest[pos + len..];
        continue 'scan;
      }
    }
    out.push_str(rest);
    break;
  }
  out
}

/// The outcome of substituting both expressions of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolution {
  /// Ids of the elements actually referenced, in first-match order,
  /// deduplicated.
  pub element_ids: Vec<i64>,
  pub left:        String,
  pub right:       String,
}

static KNOWN_TOKENS_RE: LazyLock<Regex> = LazyLock::new(|| {
  // Pivot-column aliases, numbers, arithmetic operators, whitespace.
  Regex::new(r"(?i)de_\d+|\d+(\.\d+)?|[+\-*/%\s]").unwrap()
});

/// After substitution, an expression must reduce to nothing but balanced
/// parentheses once every known token is stripped.
pub(crate) fn fully_resolved(substituted: &str) -> bool {
  let stripped = KNOWN_TOKENS_RE.replace_all(substituted, "");
  let mut depth: i32 = 0;
  for c in stripped.chars() {
    match c {
      '(' => depth += 1,
      ')' => {
        depth -= 1;
        if depth < 0 {
          return false;
        }
      }
      _ => return false,
    }
  }
  depth == 0
}

/// Substitute indicator references in both expressions, longest name
/// first. Returns `None` when either side still contains unexplained
/// text afterwards.
pub(crate) fn resolve_expressions(
  elements: &[(i64, String, Option<String>)],
  left: &str,
  right: &str,
) -> Option<Resolution> {
  let tokens = element_tokens(elements);

  let mut element_ids: Vec<i64> = Vec::new();
  let mut left_out = left.to_string();
  let mut right_out = right.to_string();

  for token in &tokens {
    let alias = format!("de_{}", token.id);
    let lower = token.text.to_lowercase();
    let hit = left_out.to_lowercase().contains(&lower)
      || right_out.to_lowercase().contains(&lower);
    if !hit {
      continue;
    }
    left_out = replace_ci(&left_out, &token.text, &alias);
    right_out = replace_ci(&right_out, &token.text, &alias);
    if !element_ids.contains(&token.id) {
      element_ids.push(token.id);
    }
  }

  // A rule referencing no indicator at all has no grid to run over.
  if element_ids.is_empty() {
    return None;
  }

  if fully_resolved(&left_out) && fully_resolved(&right_out) {
    Some(Resolution {
      element_ids,
      left: left_out,
      right: right_out,
    })
  } else {
    None
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn elements() -> Vec<(i64, String, Option<String>)> {
    vec![
      (1, "ANC Attendance".to_string(), Some("ANC".to_string())),
      (2, "Active on ART".to_string(), None),
      (3, "ART".to_string(), None),
    ]
  }

  #[test]
  fn simple_substitution() {
    let r =
      resolve_expressions(&elements(), "ANC Attendance * 100", "ART").unwrap();
    assert_eq!(r.left, "de_1 * 100");
    assert_eq!(r.right, "de_3");
    assert_eq!(r.element_ids, vec![1, 3]);
  }

  #[test]
  fn longest_name_wins_over_embedded_substring() {
    // "Active on ART" must be matched whole, not as "... de_3".
    let r = resolve_expressions(&elements(), "Active on ART", "ART").unwrap();
    assert_eq!(r.left, "de_2");
    assert_eq!(r.right, "de_3");
    assert_eq!(r.element_ids, vec![2, 3]);
  }

  #[test]
  fn alias_matches_case_insensitively() {
    let r = resolve_expressions(&elements(), "anc / 2", "1").unwrap();
    assert_eq!(r.left, "de_1 / 2");
  }

  #[test]
  fn parenthesised_arithmetic_resolves() {
    let r = resolve_expressions(
      &elements(),
      "(ANC Attendance + Active on ART) / 2.5",
      "100",
    )
    .unwrap();
    assert_eq!(r.left, "(de_1 + de_2) / 2.5");
  }

  #[test]
  fn unknown_indicator_leaves_rule_unresolved() {
    assert!(
      resolve_expressions(&elements(), "Nonexistent Indicator", "1").is_none()
    );
  }

  #[test]
  fn unbalanced_parentheses_leave_rule_unresolved() {
    assert!(resolve_expressions(&elements(), "(ANC", "1").is_none());
    assert!(resolve_expressions(&elements(), "ANC)", "1").is_none());
  }

  #[test]
  fn stray_characters_leave_rule_unresolved() {
    assert!(resolve_expressions(&elements(), "ANC; DROP", "1").is_none());
  }

  #[test]
  fn replace_handles_length_changing_case_folds() {
    // 'İ' lowercases to "i\u{307}", so lowered-string byte offsets do not
    // line up with the original; matching must stay on char boundaries.
    assert_eq!(replace_ci("İ ANC İ", "anc", "de_1"), "İ de_1 İ");
    assert_eq!(replace_ci("İİİ anc", "ANC", "de_1"), "İİİ de_1");
  }

  #[test]
  fn unicode_expression_stays_unresolved_without_panicking() {
    assert!(resolve_expressions(&elements(), "İİİ ANC", "1").is_none());
  }

  #[test]
  fn constant_only_rule_stays_unresolved() {
    assert!(resolve_expressions(&elements(), "100", "200").is_none());
  }

  #[test]
  fn fully_resolved_accepts_numbers_and_operators() {
    assert!(fully_resolved("de_1 * 100 / (de_2 + 0.5)"));
    assert!(!fully_resolved("de_1 & de_2"));
  }
}
