//! Vector math over face embeddings.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("vectors cannot be empty")]
    Empty,
    #[error("vector length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. Higher = more similar. A zero-norm input is
/// treated as maximally dissimilar and yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Cosine similarity scaled to a whole percentage in [0, 100].
///
/// Negative similarities clamp to 0 ("no match").
pub fn similarity_percent(a: &[f32], b: &[f32]) -> u8 {
    let percent = (cosine_similarity(a, b) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Cheap pre-check before the dot product: both non-empty, equal length.
pub fn validate(a: &[f32], b: &[f32]) -> Result<(), VectorError> {
    if a.is_empty() || b.is_empty() {
        return Err(VectorError::Empty);
    }
    if a.len() != b.len() {
        return Err(VectorError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}
