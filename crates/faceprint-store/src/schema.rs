//! Corpus schema and forward-only migrations.
//!
//! The schema version lives in `PRAGMA user_version`.

use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Version 1: the face table.
const V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    embedding BLOB NOT NULL,
    image BLOB NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Version 2: corpus metadata (which backend produced the embeddings).
const V2_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS corpus_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_faces_name ON faces(name);
"#;

pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`]. Each step runs in a
/// transaction together with its version bump.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let mut version = schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        let sql = match next {
            1 => V1_SQL,
            2 => V2_SQL,
            _ => unreachable!("no migration to version {next}"),
        };

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", next)?;
        tx.commit()?;

        tracing::info!(from = version, to = next, "migrated corpus schema");
        version = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(tables.contains(&"faces".to_string()));
        assert!(tables.contains(&"corpus_meta".to_string()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_from_v1() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(V1_SQL).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO faces (name, embedding, image, created_at) VALUES ('a', x'00', x'', 'now')",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM faces", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
