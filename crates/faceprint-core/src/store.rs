//! Corpus store interface and the in-memory implementation.
//!
//! The SQLite implementation lives in the `faceprint-store` crate.

use crate::types::{CorpusEntry, EncodedEmbedding, FaceRecord};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
    #[error("database: {0}")]
    Database(String),
    #[error("corpus was built with backend {stored:?}, refusing to mix in {requested:?}")]
    BackendMismatch { stored: String, requested: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Persistent collection of registered faces.
///
/// `insert` assigns ids atomically; `iterate_all` and `iterate_embeddings`
/// return a consistent snapshot ordered by ascending id. The latter leaves
/// out the image bytes and is what matching scans. Implementations are
/// blocking; async callers run them on a blocking thread.
pub trait CorpusStore: Send + Sync {
    fn insert(
        &self,
        name: &str,
        embedding: &EncodedEmbedding,
        raw_image: &[u8],
    ) -> Result<i64, StoreError>;

    fn iterate_all(&self) -> Result<Vec<FaceRecord>, StoreError>;

    fn iterate_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError>;

    fn get(&self, id: i64) -> Result<Option<FaceRecord>, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;
}

impl<S: CorpusStore + ?Sized> CorpusStore for std::sync::Arc<S> {
    fn insert(
        &self,
        name: &str,
        embedding: &EncodedEmbedding,
        raw_image: &[u8],
    ) -> Result<i64, StoreError> {
        (**self).insert(name, embedding, raw_image)
    }

    fn iterate_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        (**self).iterate_all()
    }

    fn iterate_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError> {
        (**self).iterate_embeddings()
    }

    fn get(&self, id: i64) -> Result<Option<FaceRecord>, StoreError> {
        (**self).get(id)
    }

    fn count(&self) -> Result<u64, StoreError> {
        (**self).count()
    }
}

/// Process-local corpus, lost on exit.
#[derive(Default)]
pub struct MemoryCorpus {
    records: RwLock<Vec<FaceRecord>>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorpusStore for MemoryCorpus {
    fn insert(
        &self,
        name: &str,
        embedding: &EncodedEmbedding,
        raw_image: &[u8],
    ) -> Result<i64, StoreError> {
        let mut records = self.records.write()?;
        let id = records.last().map_or(1, |r| r.id + 1);
        records.push(FaceRecord {
            id,
            name: name.to_string(),
            embedding: embedding.clone(),
            raw_image: raw_image.to_vec(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(id)
    }

    fn iterate_all(&self) -> Result<Vec<FaceRecord>, StoreError> {
        Ok(self.records.read()?.clone())
    }

    fn iterate_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError> {
        Ok(self.records.read()?.iter().map(CorpusEntry::from).collect())
    }

    fn get(&self, id: i64) -> Result<Option<FaceRecord>, StoreError> {
        Ok(self.records.read()?.iter().find(|r| r.id == id).cloned())
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn blob(byte: u8) -> EncodedEmbedding {
        EncodedEmbedding::from(vec![byte; 4])
    }

    #[test]
    fn test_insert_assigns_ascending_ids() {
        let store = MemoryCorpus::new();
        assert_eq!(store.insert("alice", &blob(1), b"img-a").unwrap(), 1);
        assert_eq!(store.insert("bob", &blob(2), b"img-b").unwrap(), 2);

        let all = store.iterate_all().unwrap();
        let ids: Vec<i64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(all[1].name, "bob");
        assert_eq!(all[1].raw_image, b"img-b");
        assert!(chrono::DateTime::parse_from_rfc3339(&all[0].created_at).is_ok());
    }

    #[test]
    fn test_get_and_count() {
        let store = MemoryCorpus::new();
        assert_eq!(store.count().unwrap(), 0);
        let id = store.insert("carol", &blob(9), b"").unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(id).unwrap().unwrap().embedding, blob(9));
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn test_embedding_scan_matches_full_snapshot() {
        let store = MemoryCorpus::new();
        store.insert("a", &blob(1), &[7u8; 1024]).unwrap();
        store.insert("b", &blob(2), b"").unwrap();

        let entries = store.iterate_embeddings().unwrap();
        let full = store.iterate_all().unwrap();
        assert_eq!(entries.len(), full.len());
        for (entry, record) in entries.iter().zip(&full) {
            assert_eq!(entry, &CorpusEntry::from(record));
        }
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let store = Arc::new(MemoryCorpus::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..25)
                        .map(|i| store.insert(&format!("p{t}-{i}"), &blob(t), b"x").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.count().unwrap(), 200);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_inserts() {
        let store = MemoryCorpus::new();
        store.insert("a", &blob(1), b"").unwrap();
        let snapshot = store.iterate_all().unwrap();
        store.insert("b", &blob(2), b"").unwrap();
        assert_eq!(snapshot.len(), 1);
    }
}
