//! faceprint-store — SQLite corpus store.
//!
//! One connection behind a mutex, WAL journal. Async callers are expected to
//! reach it from `spawn_blocking`.

pub mod schema;

use faceprint_core::{CorpusEntry, CorpusStore, EncodedEmbedding, FaceRecord, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);
const META_BACKEND: &str = "backend";

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

pub struct SqliteCorpus {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCorpus {
    /// Open (or create) the corpus database at `path`, creating parent
    /// directories and running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        tracing::info!(path = %path.display(), "corpus database opened");
        Ok(store)
    }

    /// Private in-memory database, for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        schema::migrate(&mut conn).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record which backend produces this corpus's embeddings, or check that
    /// it matches the one already recorded. Vectors from different backends
    /// are not comparable.
    pub fn bind_backend(&self, backend: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM corpus_meta WHERE key = ?1",
                [META_BACKEND],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match stored {
            Some(stored) if stored == backend => Ok(()),
            Some(stored) => Err(StoreError::BackendMismatch {
                stored,
                requested: backend.to_string(),
            }),
            None => {
                conn.execute(
                    "INSERT INTO corpus_meta (key, value) VALUES (?1, ?2)",
                    params![META_BACKEND, backend],
                )
                .map_err(db_err)?;
                tracing::info!(backend, "corpus bound to backend");
                Ok(())
            }
        }
    }

    pub fn bound_backend(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock()?;
        conn.query_row(
            "SELECT value FROM corpus_meta WHERE key = ?1",
            [META_BACKEND],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FaceRecord> {
    Ok(FaceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        embedding: EncodedEmbedding::from(row.get::<_, Vec<u8>>(2)?),
        raw_image: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CorpusEntry> {
    Ok(CorpusEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        embedding: EncodedEmbedding::from(row.get::<_, Vec<u8>>(2)?),
        created_at: row.get(3)?,
    })
}

impl CorpusStore for SqliteCorpus {
    fn insert(
        &self,
        name: &str,
        embedding: &EncodedEmbedding,
        raw_image: &[u8],
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO faces (name, embedding, image, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                embedding.as_bytes(),
                raw_image,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, name, "face row inserted");
        Ok(id)
    }

    fn iterate_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT id, name, embedding, image, created_at FROM faces ORDER BY id")
            .map_err(db_err)?;
        let records = stmt
            .query_map([], record_from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(records)
    }

    fn iterate_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT id, name, embedding, created_at FROM faces ORDER BY id")
            .map_err(db_err)?;
        let entries = stmt
            .query_map([], entry_from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(entries)
    }

    fn get(&self, id: i64) -> Result<Option<FaceRecord>, StoreError> {
        let conn = self.conn.lock()?;
        conn.query_row(
            "SELECT id, name, embedding, image, created_at FROM faces WHERE id = ?1",
            [id],
            record_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as u64)
    }
}
