//! Sparse-to-dense grid completion.
//!
//! Aggregate queries only return rows where at least one fact exists; a
//! spreadsheet-style report needs exactly one cell for every org unit ×
//! every requested indicator. [`rasterize`] fills the gaps.

use std::collections::HashMap;
use std::hash::Hash;

/// One cell of a dense report grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell<R, C, V> {
  pub row:   R,
  pub col:   C,
  pub value: V,
}

/// Expand `sparse` onto the full Cartesian product `row_keys × col_keys`.
///
/// The output has exactly `row_keys.len() * col_keys.len()` cells, grouped
/// by row key, with the cells inside each row group in `col_keys` order —
/// downstream calculation code relies on that ordering when it picks cells
/// out of a row group. Sparse entries outside the requested product are
/// ignored; duplicate sparse keys resolve last-write-wins; every gap is
/// filled with `default(&row, &col)`.
pub fn rasterize<R, C, V, F>(
  row_keys: &[R],
  col_keys: &[C],
  sparse: impl IntoIterator<Item = ((R, C), V)>,
  mut default: F,
) -> Vec<Cell<R, C, V>>
where
  R: Clone + Eq + Hash,
  C: Clone + Eq + Hash,
  V: Clone,
  F: FnMut(&R, &C) -> V,
{
  let mut lookup: HashMap<(R, C), V> = HashMap::new();
  for (key, value) in sparse {
    lookup.insert(key, value);
  }

  let mut out = Vec::with_capacity(row_keys.len() * col_keys.len());
  for row in row_keys {
    for col in col_keys {
      let value = lookup
        .get(&(row.clone(), col.clone()))
        .cloned()
        .unwrap_or_else(|| default(row, col));
      out.push(Cell {
        row:   row.clone(),
        col:   col.clone(),
        value,
      });
    }
  }
  out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn keys() -> (Vec<&'static str>, Vec<&'static str>) {
    (vec!["kampala", "gulu", "mbale"], vec!["opd", "anc"])
  }

  #[test]
  fn output_is_full_cartesian_product() {
    let (rows, cols) = keys();
    let sparse = vec![(("kampala", "opd"), Some(7))];
    let grid = rasterize(&rows, &cols, sparse, |_, _| None);

    assert_eq!(grid.len(), rows.len() * cols.len());

    // Every pair appears exactly once, in row-major/col-ordered sequence.
    let expected: Vec<(&str, &str)> = rows
      .iter()
      .flat_map(|r| cols.iter().map(move |c| (*r, *c)))
      .collect();
    let actual: Vec<(&str, &str)> =
      grid.iter().map(|c| (c.row, c.col)).collect();
    assert_eq!(actual, expected);
  }

  #[test]
  fn existing_values_preserved_gaps_defaulted() {
    let (rows, cols) = keys();
    let sparse = vec![(("gulu", "anc"), Some(3)), (("mbale", "opd"), Some(9))];
    let grid = rasterize(&rows, &cols, sparse, |_, _| None);

    let at = |r: &str, c: &str| {
      grid
        .iter()
        .find(|cell| cell.row == r && cell.col == c)
        .unwrap()
        .value
    };
    assert_eq!(at("gulu", "anc"), Some(3));
    assert_eq!(at("mbale", "opd"), Some(9));
    assert_eq!(at("kampala", "anc"), None);
  }

  #[test]
  fn duplicate_sparse_keys_last_write_wins() {
    let (rows, cols) = keys();
    let sparse =
      vec![(("gulu", "opd"), Some(1)), (("gulu", "opd"), Some(2))];
    let grid = rasterize(&rows, &cols, sparse, |_, _| None);
    let cell = grid
      .iter()
      .find(|c| c.row == "gulu" && c.col == "opd")
      .unwrap();
    assert_eq!(cell.value, Some(2));
    assert_eq!(grid.len(), 6);
  }

  #[test]
  fn unknown_sparse_keys_are_ignored() {
    let (rows, cols) = keys();
    let sparse = vec![(("nowhere", "opd"), Some(5))];
    let grid = rasterize(&rows, &cols, sparse, |_, _| None);
    assert_eq!(grid.len(), 6);
    assert!(grid.iter().all(|c| c.value.is_none()));
  }

  #[test]
  fn default_sees_both_keys() {
    let (rows, cols) = keys();
    let grid =
      rasterize(&rows, &cols, Vec::<((&str, &str), String)>::new(), |r, c| {
        format!("{r}/{c}")
      });
    assert_eq!(grid[0].value, "kampala/opd");
    assert_eq!(grid[5].value, "mbale/anc");
  }
}
