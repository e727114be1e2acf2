//! Nested-set maintenance for the org-unit tree, plus the memoized
//! path→node cache.
//!
//! All functions here run synchronously inside a
//! [`tokio_rusqlite::Connection::call`] closure. The nested-set invariant
//! maintained throughout: a node's `[lft, rght]` range strictly contains
//! exactly its descendants' ranges, and sibling ranges never overlap.

use std::{
  collections::HashMap,
  sync::Mutex,
};

use afya_core::orgunit::OrgUnit;
use rusqlite::{Connection, OptionalExtension as _, params};

// ─── Row mapping ─────────────────────────────────────────────────────────────

const OU_COLUMNS: &str = "id, name, parent_id, lft, rght, level";

pub(crate) fn org_unit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrgUnit> {
  Ok(OrgUnit {
    id:        row.get(0)?,
    name:      row.get(1)?,
    parent_id: row.get(2)?,
    lft:       row.get(3)?,
    rght:      row.get(4)?,
    level:     row.get(5)?,
  })
}

pub(crate) fn fetch_org_unit(
  conn: &Connection,
  id: i64,
) -> rusqlite::Result<Option<OrgUnit>> {
  conn
    .query_row(
      &format!("SELECT {OU_COLUMNS} FROM org_units WHERE id = ?1"),
      params![id],
      org_unit_from_row,
    )
    .optional()
}

/// Case-insensitive child lookup under `parent_id` (`None` = root level).
pub(crate) fn fetch_child(
  conn: &Connection,
  parent_id: Option<i64>,
  name: &str,
) -> rusqlite::Result<Option<OrgUnit>> {
  let sql = format!(
    "SELECT {OU_COLUMNS} FROM org_units
     WHERE ifnull(parent_id, 0) = ifnull(?1, 0) AND name = ?2 COLLATE NOCASE"
  );
  conn
    .query_row(&sql, params![parent_id, name], org_unit_from_row)
    .optional()
}

// ─── Structural writes ───────────────────────────────────────────────────────

/// Insert `name` as the last child of `parent` (or as a new root), shifting
/// the nested-set indices to open a gap of width 2.
pub(crate) fn insert_child(
  conn: &Connection,
  parent: Option<&OrgUnit>,
  name: &str,
) -> rusqlite::Result<OrgUnit> {
  let (new_lft, level, parent_id) = match parent {
    Some(p) => (p.rght, p.level + 1, Some(p.id)),
    None => {
      let max_rght: Option<i64> = conn.query_row(
        "SELECT MAX(rght) FROM org_units WHERE parent_id IS NULL",
        [],
        |r| r.get(0),
      )?;
      (max_rght.map_or(1, |m| m + 1), 0, None)
    }
  };

  conn.execute(
    "UPDATE org_units SET rght = rght + 2 WHERE rght >= ?1",
    params![new_lft],
  )?;
  conn.execute(
    "UPDATE org_units SET lft = lft + 2 WHERE lft >= ?1",
    params![new_lft],
  )?;
  conn.execute(
    "INSERT INTO org_units (name, parent_id, lft, rght, level)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    params![name, parent_id, new_lft, new_lft + 1, level],
  )?;
  let id = conn.last_insert_rowid();

  Ok(OrgUnit {
    id,
    name: name.to_string(),
    parent_id,
    lft: new_lft,
    rght: new_lft + 1,
    level,
  })
}

/// Delete a node and its whole subtree, closing the nested-set gap.
/// Fact rows under the subtree cascade via foreign keys.
pub(crate) fn delete_subtree(
  conn: &Connection,
  unit: &OrgUnit,
) -> rusqlite::Result<()> {
  let width = unit.rght - unit.lft + 1;
  conn.execute(
    "DELETE FROM org_units WHERE lft BETWEEN ?1 AND ?2",
    params![unit.lft, unit.rght],
  )?;
  conn.execute(
    "UPDATE org_units SET rght = rght - ?1 WHERE rght > ?2",
    params![width, unit.rght],
  )?;
  conn.execute(
    "UPDATE org_units SET lft = lft - ?1 WHERE lft > ?2",
    params![width, unit.rght],
  )?;
  Ok(())
}

/// Ancestors of `unit` from the root down, `unit` itself included.
pub(crate) fn ancestor_names(
  conn: &Connection,
  unit_lft: i64,
  unit_rght: i64,
) -> rusqlite::Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM org_units WHERE lft <= ?1 AND rght >= ?2 ORDER BY lft",
  )?;
  let names = stmt
    .query_map(params![unit_lft, unit_rght], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(names)
}

// ─── Path cache ──────────────────────────────────────────────────────────────

/// Entry cap for the memoized path cache. Hierarchies in practice stay in
/// the low thousands of facilities; when the cap is hit the cache is
/// cleared wholesale rather than evicted piecemeal.
const PATH_CACHE_CAP: usize = 4096;

/// Process-wide memo of normalised-path → org-unit id. Owned by the store;
/// every structural delete goes through the store, which calls
/// [`PathCache::clear`], so cache and storage cannot diverge.
#[derive(Default)]
pub(crate) struct PathCache {
  map: Mutex<HashMap<String, i64>>,
}

impl PathCache {
  pub fn get(&self, key: &str) -> Option<i64> {
    self.map.lock().ok()?.get(key).copied()
  }

  pub fn put(&self, key: String, id: i64) {
    if let Ok(mut map) = self.map.lock() {
      if map.len() >= PATH_CACHE_CAP {
        map.clear();
      }
      map.insert(key, id);
    }
  }

  pub fn clear(&self) {
    if let Ok(mut map) = self.map.lock() {
      map.clear();
    }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(crate::schema::SCHEMA).unwrap();
    conn
  }

  fn assert_nested_set_valid(conn: &Connection) {
    // Every node's range strictly contains its children's ranges, and the
    // count of nodes inside a range equals (rght - lft + 1) / 2.
    let mut stmt = conn
      .prepare("SELECT id, lft, rght FROM org_units")
      .unwrap();
    let nodes: Vec<(i64, i64, i64)> = stmt
      .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
      .unwrap()
      .collect::<rusqlite::Result<_>>()
      .unwrap();
    for (_, lft, rght) in &nodes {
      assert!(lft < rght);
      assert_eq!((rght - lft + 1) % 2, 0);
      let inside = nodes
        .iter()
        .filter(|(_, l, r)| l >= lft && r <= rght)
        .count() as i64;
      assert_eq!(inside, (rght - lft + 1) / 2);
    }
  }

  #[test]
  fn insert_maintains_nested_set() {
    let c = conn();
    let root = insert_child(&c, None, "Root").unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    let a = insert_child(&c, Some(&root), "A").unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    insert_child(&c, Some(&root), "B").unwrap();
    let a = fetch_org_unit(&c, a.id).unwrap().unwrap();
    insert_child(&c, Some(&a), "A1").unwrap();
    assert_nested_set_valid(&c);

    // Root now spans everything.
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    assert_eq!(root.lft, 1);
    assert_eq!(root.rght, 8);
  }

  #[test]
  fn delete_closes_the_gap() {
    let c = conn();
    let root = insert_child(&c, None, "Root").unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    let a = insert_child(&c, Some(&root), "A").unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    let b = insert_child(&c, Some(&root), "B").unwrap();
    let a = fetch_org_unit(&c, a.id).unwrap().unwrap();
    insert_child(&c, Some(&a), "A1").unwrap();

    let a = fetch_org_unit(&c, a.id).unwrap().unwrap();
    delete_subtree(&c, &a).unwrap();
    assert!(fetch_org_unit(&c, a.id).unwrap().is_none());
    assert_nested_set_valid(&c);

    let b = fetch_org_unit(&c, b.id).unwrap().unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    assert!(root.contains(&b));
    assert_eq!(root.rght, 4);
  }

  #[test]
  fn ancestor_names_root_down() {
    let c = conn();
    let root = insert_child(&c, None, "Root").unwrap();
    let root = fetch_org_unit(&c, root.id).unwrap().unwrap();
    let d = insert_child(&c, Some(&root), "Sample District").unwrap();
    let d = fetch_org_unit(&c, d.id).unwrap().unwrap();
    let f = insert_child(&c, Some(&d), "Test HC II").unwrap();
    let f = fetch_org_unit(&c, f.id).unwrap().unwrap();

    let names = ancestor_names(&c, f.lft, f.rght).unwrap();
    assert_eq!(names, vec!["Root", "Sample District", "Test HC II"]);
  }

  #[test]
  fn path_cache_caps_and_clears() {
    let cache = PathCache::default();
    cache.put("a".into(), 1);
    assert_eq!(cache.get("a"), Some(1));
    cache.clear();
    assert_eq!(cache.get("a"), None);
  }
}
