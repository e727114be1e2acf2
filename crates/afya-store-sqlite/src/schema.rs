//! SQL schema for the Afya SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
///
/// Notes on the fact table: the composite business key
/// `(element, combo, org unit, period)` cannot be one unique index because
/// exactly one of the three period columns is populated per row and
/// uniqueness treats NULL as always-distinct — hence one partial unique
/// index per granularity, which also serve as the upsert conflict targets.
/// `numeric_value` is stored as its exact decimal string; aggregate SQL
/// casts to REAL at read time.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS org_units (
    id        INTEGER PRIMARY KEY,
    name      TEXT NOT NULL,
    parent_id INTEGER REFERENCES org_units(id),
    lft       INTEGER NOT NULL,
    rght      INTEGER NOT NULL,
    level     INTEGER NOT NULL
);
-- Sibling names are unique case-insensitively; ifnull() folds the NULL
-- parents of root nodes into one comparable value.
CREATE UNIQUE INDEX IF NOT EXISTS ou_sibling_uniq
    ON org_units(ifnull(parent_id, 0), name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS ou_range_idx ON org_units(lft, rght);

CREATE TABLE IF NOT EXISTS data_elements (
    id                 INTEGER PRIMARY KEY,
    name               TEXT NOT NULL UNIQUE COLLATE NOCASE,
    alias              TEXT UNIQUE COLLATE NOCASE,
    value_type         TEXT NOT NULL DEFAULT 'number',
    value_min          TEXT,
    value_max          TEXT,
    aggregation_method TEXT NOT NULL DEFAULT 'sum'
);

CREATE TABLE IF NOT EXISTS categories (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS category_combos (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS combo_categories (
    combo_id    INTEGER NOT NULL REFERENCES category_combos(id) ON DELETE CASCADE,
    category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
    PRIMARY KEY (combo_id, category_id)
);

-- Combo 1 is the pre-seeded 'no disaggregation' default.
INSERT OR IGNORE INTO category_combos (id, name) VALUES (1, '(default)');

CREATE TABLE IF NOT EXISTS source_documents (
    id            INTEGER PRIMARY KEY,
    original_name TEXT NOT NULL,
    stored_name   TEXT NOT NULL UNIQUE,
    uploaded_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS data_values (
    id                 INTEGER PRIMARY KEY,
    data_element_id    INTEGER NOT NULL REFERENCES data_elements(id) ON DELETE CASCADE,
    category_combo_id  INTEGER NOT NULL DEFAULT 1 REFERENCES category_combos(id),
    org_unit_id        INTEGER NOT NULL REFERENCES org_units(id) ON DELETE CASCADE,
    site_str           TEXT NOT NULL DEFAULT '',
    numeric_value      TEXT NOT NULL,
    year               TEXT,
    quarter            TEXT,
    month              TEXT,
    source_document_id INTEGER REFERENCES source_documents(id),
    CHECK ((year IS NOT NULL) + (quarter IS NOT NULL) + (month IS NOT NULL) = 1)
);
CREATE UNIQUE INDEX IF NOT EXISTS dv_month_uniq
    ON data_values(data_element_id, category_combo_id, org_unit_id, month)
    WHERE month IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS dv_quarter_uniq
    ON data_values(data_element_id, category_combo_id, org_unit_id, quarter)
    WHERE quarter IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS dv_year_uniq
    ON data_values(data_element_id, category_combo_id, org_unit_id, year)
    WHERE year IS NOT NULL;
CREATE INDEX IF NOT EXISTS dv_element_idx ON data_values(data_element_id);
CREATE INDEX IF NOT EXISTS dv_org_unit_idx ON data_values(org_unit_id);

CREATE TABLE IF NOT EXISTS validation_rules (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE COLLATE NOCASE,
    left_expr  TEXT NOT NULL,
    operator   TEXT NOT NULL,
    right_expr TEXT NOT NULL,
    resolved   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS validation_rule_elements (
    rule_id         INTEGER NOT NULL REFERENCES validation_rules(id) ON DELETE CASCADE,
    data_element_id INTEGER NOT NULL REFERENCES data_elements(id) ON DELETE CASCADE,
    PRIMARY KEY (rule_id, data_element_id)
);

PRAGMA user_version = 1;
";
