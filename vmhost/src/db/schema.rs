//! SQL schema definitions.

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

const ENTITIES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind TEXT NOT NULL,
    uid TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (kind, uid)
);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind);
";

pub fn all_schemas() -> [&'static str; 2] {
    [SCHEMA_VERSION_TABLE, ENTITIES_TABLE]
}
