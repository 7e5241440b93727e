//! Embedding storage codec.
//!
//! Stored layout: zlib stream (level 6) wrapping a little-endian IEEE-754
//! binary16 array, one element per embedding dimension. Existing corpora
//! depend on this exact layout.

use crate::types::{EncodedEmbedding, Embedding};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use half::f16;
use std::io::Write;
use thiserror::Error;

/// zlib level used for every stored blob. Changing it changes stored bytes.
pub const COMPRESSION_LEVEL: u32 = 6;

/// Upper bound on decoded dimensions; larger payloads are rejected as corrupt.
pub const MAX_DECODED_DIM: usize = 65_536;

const F16_SIZE: usize = std::mem::size_of::<u16>();
const INFLATE_CHUNK: usize = 4096;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("vector has zero norm")]
    ZeroNorm,
    #[error("vector contains non-finite components")]
    NonFinite,
    #[error("failed to compress embedding: {0}")]
    Encode(String),
    #[error("malformed embedding blob: {0}")]
    Decode(String),
}

/// Scale `raw` to unit Euclidean norm.
///
/// The norm is accumulated in f64 so that the result is within 1e-6 of unit
/// norm for any finite input. Zero-magnitude (or empty) input is an error,
/// never a zero or NaN vector.
pub fn normalize(raw: &[f32]) -> Result<Embedding, CodecError> {
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(CodecError::NonFinite);
    }

    let norm = raw
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 {
        return Err(CodecError::ZeroNorm);
    }

    let values = raw.iter().map(|&v| (f64::from(v) / norm) as f32).collect();
    Ok(Embedding::from_unit(values))
}

/// Quantize to half precision and compress. Identical input always yields
/// identical bytes.
pub fn encode(embedding: &Embedding) -> Result<EncodedEmbedding, CodecError> {
    let mut raw = Vec::with_capacity(embedding.dim() * F16_SIZE);
    for &v in embedding.values() {
        raw.extend_from_slice(&f16::from_f32(v).to_le_bytes());
    }

    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(raw.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder
        .write_all(&raw)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    Ok(EncodedEmbedding::from(compressed))
}

/// Inverse of [`encode`]: inflate, reinterpret as binary16, widen to f32.
///
/// The blob must be exactly one complete zlib stream. Truncation, trailing
/// bytes, checksum mismatch, an odd payload length, or an empty payload are
/// all [`CodecError::Decode`].
pub fn decode(blob: &[u8]) -> Result<Vec<f32>, CodecError> {
    let raw = inflate(blob)?;

    if raw.is_empty() {
        return Err(CodecError::Decode("empty payload".into()));
    }
    if raw.len() % F16_SIZE != 0 {
        return Err(CodecError::Decode(format!(
            "payload length {} is not a multiple of {F16_SIZE}",
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(F16_SIZE)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
        .collect())
}

fn inflate(blob: &[u8]) -> Result<Vec<u8>, CodecError> {
    let limit = MAX_DECODED_DIM * F16_SIZE;
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(INFLATE_CHUNK);

    loop {
        if out.len() == out.capacity() {
            if out.len() >= limit {
                return Err(CodecError::Decode(format!(
                    "payload exceeds {MAX_DECODED_DIM} dimensions"
                )));
            }
            out.reserve(INFLATE_CHUNK);
        }

        let before = (inflater.total_in(), inflater.total_out());
        let consumed = before.0 as usize;
        let status = inflater
            .decompress_vec(&blob[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = (inflater.total_in(), inflater.total_out()) == before;
                if stalled && out.len() < out.capacity() {
                    return Err(CodecError::Decode("truncated stream".into()));
                }
            }
        }
    }

    let consumed = inflater.total_in() as usize;
    if consumed != blob.len() {
        return Err(CodecError::Decode(format!(
            "{} trailing bytes after end of stream",
            blob.len() - consumed
        )));
    }
    if out.len() > limit {
        return Err(CodecError::Decode(format!(
            "payload exceeds {MAX_DECODED_DIM} dimensions"
        )));
    }

    Ok(out)
}
