use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Unit-norm face embedding (512-dimensional for ArcFace).
///
/// Can only be built through [`crate::codec::normalize`], so holding one means
/// its Euclidean norm is 1 within float tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub(crate) fn from_unit(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity against a stored vector of the same dimension.
    ///
    /// Both operands are unit-norm, so this is the plain dot product. The
    /// result is clamped to [-1, 1] to absorb half-precision drift in stored
    /// vectors.
    pub fn similarity(&self, other: &[f32]) -> f32 {
        let dot: f32 = self
            .values
            .iter()
            .zip(other.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot.clamp(-1.0, 1.0)
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Compressed half-precision embedding, as persisted in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEmbedding(Vec<u8>);

impl EncodedEmbedding {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncodedEmbedding {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A registered face as held by the corpus store.
#[derive(Clone)]
pub struct FaceRecord {
    pub id: i64,
    pub name: String,
    pub embedding: EncodedEmbedding,
    /// Image bytes exactly as submitted at registration.
    pub raw_image: Vec<u8>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl std::fmt::Debug for FaceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("embedding_bytes", &self.embedding.len())
            .field("raw_image_bytes", &self.raw_image.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A stored face without its image bytes, as scanned during matching.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub id: i64,
    pub name: String,
    pub embedding: EncodedEmbedding,
    pub created_at: String,
}

impl From<&FaceRecord> for CorpusEntry {
    fn from(record: &FaceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            embedding: record.embedding.clone(),
            created_at: record.created_at.clone(),
        }
    }
}

/// Best-scoring corpus record for a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub id: i64,
    pub name: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// Outcome of matching a query embedding against the corpus.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match(MatchResult),
    /// No record reached the threshold. `best_score` is the highest score
    /// seen, or `None` if nothing could be scored.
    NoMatch { best_score: Option<f32> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }

    pub fn into_match(self) -> Option<MatchResult> {
        match self {
            MatchOutcome::Match(result) => Some(result),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}
