//! Register / verify orchestration.

use crate::adapter::BackendAdapter;
use crate::codec;
use crate::error::FaceError;
use crate::matcher::{CosineMatcher, Matcher};
use crate::store::CorpusStore;
use crate::types::{Embedding, MatchOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const MAX_NAME_CHARS: usize = 128;

/// Snapshot for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub records: u64,
    pub backend: String,
    pub backend_loaded: bool,
}

/// Metadata of one stored face, after its embedding decoded successfully.
#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub id: i64,
    pub name: String,
    pub dimension: usize,
    pub created_at: String,
}

pub struct FaceService<S> {
    adapter: Arc<BackendAdapter>,
    store: S,
    matcher: Box<dyn Matcher>,
}

impl<S: CorpusStore> FaceService<S> {
    pub fn new(adapter: Arc<BackendAdapter>, store: S, threshold: f32) -> Self {
        Self {
            adapter,
            store,
            matcher: Box::new(CosineMatcher::new(threshold)),
        }
    }

    pub fn adapter(&self) -> &BackendAdapter {
        &self.adapter
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Embed the dominant face in `image_bytes` and store it under `name`.
    pub fn register(&self, name: &str, image_bytes: &[u8]) -> Result<i64, FaceError> {
        let name = validate_name(name)?;
        let started = Instant::now();
        let embedding = self.embed(image_bytes)?;
        let blob = codec::encode(&embedding)?;
        let id = self.store.insert(name, &blob, image_bytes)?;

        tracing::info!(
            id,
            name,
            dim = embedding.dim(),
            blob_bytes = blob.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "face registered"
        );
        Ok(id)
    }

    /// Find the best stored match for the dominant face in `image_bytes`.
    pub fn verify(&self, image_bytes: &[u8]) -> Result<MatchOutcome, FaceError> {
        let started = Instant::now();
        let query = self.embed(image_bytes)?;
        let corpus = self.store.iterate_embeddings()?;
        let outcome = self.matcher.best_match(&query, &corpus);

        match &outcome {
            MatchOutcome::Match(m) => tracing::info!(
                id = m.id,
                name = %m.name,
                score = m.score,
                corpus = corpus.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "verify: match"
            ),
            MatchOutcome::NoMatch { best_score } => tracing::info!(
                best_score = ?best_score,
                corpus = corpus.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "verify: no match"
            ),
        }
        Ok(outcome)
    }

    /// Decode one stored embedding. Unlike a scan, corruption fails the call.
    pub fn embedding_of(&self, id: i64) -> Result<Vec<f32>, FaceError> {
        self.describe(id).map(|(_, values)| values)
    }

    pub fn summary(&self, id: i64) -> Result<FaceSummary, FaceError> {
        self.describe(id).map(|(summary, _)| summary)
    }

    pub fn health(&self) -> Result<HealthReport, FaceError> {
        Ok(HealthReport {
            records: self.store.count()?,
            backend: self.adapter.backend_name().to_string(),
            backend_loaded: self.adapter.is_loaded(),
        })
    }

    fn describe(&self, id: i64) -> Result<(FaceSummary, Vec<f32>), FaceError> {
        let record = self.store.get(id)?.ok_or(FaceError::NotFound(id))?;
        let values = codec::decode(record.embedding.as_bytes()).map_err(|err| {
            tracing::error!(id, error = %err, "stored embedding failed to decode");
            FaceError::from(err)
        })?;
        let summary = FaceSummary {
            id: record.id,
            name: record.name,
            dimension: values.len(),
            created_at: record.created_at,
        };
        Ok((summary, values))
    }

    fn embed(&self, image_bytes: &[u8]) -> Result<Embedding, FaceError> {
        if image_bytes.is_empty() {
            return Err(FaceError::Input("empty image".into()));
        }
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| FaceError::Input(format!("could not decode image: {e}")))?
            .to_rgb8();
        self.adapter.extract(&image)
    }
}

fn validate_name(name: &str) -> Result<&str, FaceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FaceError::Input("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(FaceError::Input(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name)
}
