use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{SimilarityFunction, MAX_VECTOR_TERM_BYTES};

/// Norm below which a vector counts as zero for cosine purposes.
pub const ZERO_NORM_EPSILON: f32 = 1e-6;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Similarity score, higher is better. Euclidean distance is mapped
/// through 1/(1+d²) so all three functions rank descending.
pub fn score(similarity: SimilarityFunction, a: &[f32], b: &[f32]) -> f32 {
    match similarity {
        SimilarityFunction::Cosine => {
            let denom = norm(a) * norm(b);
            if denom <= ZERO_NORM_EPSILON {
                return f32::MIN;
            }
            dot(a, b) / denom
        }
        SimilarityFunction::DotProduct => dot(a, b),
        SimilarityFunction::Euclidean => 1.0 / (1.0 + squared_euclidean(a, b)),
    }
}

/// Write- and query-time validation: vectors must be finite, fit the term
/// size limit, and carry a usable norm under cosine.
pub fn validate_vector(similarity: SimilarityFunction, v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(Error::new(ErrorKind::InvalidVector, "empty vector"));
    }
    if v.len() * 4 > MAX_VECTOR_TERM_BYTES {
        return Err(Error::new(
            ErrorKind::TermTooLarge,
            format!("vector of {} bytes exceeds limit {}", v.len() * 4, MAX_VECTOR_TERM_BYTES),
        ));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::new(ErrorKind::InvalidVector, "vector has non-finite component"));
    }
    if similarity == SimilarityFunction::Cosine && norm(v) <= ZERO_NORM_EPSILON {
        return Err(Error::new(
            ErrorKind::InvalidVector,
            "zero or near-zero vector rejected under cosine",
        ));
    }
    Ok(())
}

/// Raw little-endian float bytes; the dedup key for shared vectors.
pub fn vector_bytes(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn normalized(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n <= ZERO_NORM_EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / n).collect()
}
