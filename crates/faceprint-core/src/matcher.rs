//! Corpus matching by cosine similarity.

use crate::codec;
use crate::types::{CorpusEntry, Embedding, MatchOutcome, MatchResult};

/// Strategy for finding the best-matching record for a query embedding.
///
/// The linear scan in [`CosineMatcher`] is the only implementation; an
/// indexed nearest-neighbour search would slot in behind this trait.
pub trait Matcher: Send + Sync {
    fn best_match(&self, query: &Embedding, corpus: &[CorpusEntry]) -> MatchOutcome;
}

/// Full-scan cosine matcher with an acceptance threshold.
///
/// Every record is decoded and scored; there is no early exit. On equal
/// scores the record seen first (lowest id) wins. Records whose embedding
/// cannot be decoded, or whose dimension differs from the query, are
/// skipped with a warning so one bad row cannot block verification.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    threshold: f32,
}

impl CosineMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for CosineMatcher {
    fn best_match(&self, query: &Embedding, corpus: &[CorpusEntry]) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;
        let mut skipped = 0usize;

        for (i, record) in corpus.iter().enumerate() {
            let stored = match codec::decode(record.embedding.as_bytes()) {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(id = record.id, error = %err, "skipping record with corrupt embedding");
                    skipped += 1;
                    continue;
                }
            };

            if stored.len() != query.dim() {
                tracing::warn!(
                    id = record.id,
                    stored_dim = stored.len(),
                    query_dim = query.dim(),
                    "skipping record with mismatched embedding dimension"
                );
                skipped += 1;
                continue;
            }

            let score = query.similarity(&stored);
            if !score.is_finite() {
                tracing::warn!(id = record.id, "skipping record with non-finite score");
                skipped += 1;
                continue;
            }

            // Strictly greater: ties keep the earlier record.
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((i, score));
            }
        }

        tracing::debug!(
            scanned = corpus.len(),
            skipped,
            best = ?best.map(|(i, s)| (corpus[i].id, s)),
            threshold = self.threshold,
            "corpus scan complete"
        );

        match best {
            Some((idx, score)) if score >= self.threshold => MatchOutcome::Match(MatchResult {
                id: corpus[idx].id,
                name: corpus[idx].name.clone(),
                score,
            }),
            other => MatchOutcome::NoMatch {
                best_score: other.map(|(_, score)| score),
            },
        }
    }
}
