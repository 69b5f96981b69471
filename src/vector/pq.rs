use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SimilarityFunction;
use crate::vector::kmeans::KMeans;
use crate::vector::similarity::{dot, norm, normalized, squared_euclidean};

/// Tolerance for the unit-vector detection: a dot-product segment whose
/// training vectors are all within this of unit norm records unit-vector
/// mode and scores PQ comparisons with cosine (equivalent on the unit
/// sphere and better behaved under quantization). One non-unit vector
/// keeps true dot-product semantics.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-4;

const CODEBOOK_SIZE: usize = 256;

/// Product quantizer: the vector space is split into subspaces, each with
/// a k-means codebook; a vector compresses to one code byte per subspace.
/// Graph traversal scores against a per-query lookup table; the final
/// top-k is reranked on exact vectors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductQuantizer {
    pub dim: usize,
    pub num_subspaces: usize,
    pub codebook_size: usize,
    /// [subspace][codeword][component]
    codebooks: Vec<Vec<Vec<f32>>>,
    pub similarity: SimilarityFunction,
    pub unit_vectors: bool,
}

impl ProductQuantizer {
    /// Train codebooks over the segment's vectors (flat, row-major).
    pub fn train(
        data: &[f32],
        num_vectors: usize,
        dim: usize,
        similarity: SimilarityFunction,
        seed: u64,
    ) -> Result<Self> {
        if num_vectors == 0 || dim == 0 || data.len() != num_vectors * dim {
            return Err(Error::new(ErrorKind::InvalidArgument, "bad PQ training input"));
        }
        let num_subspaces = subspace_count(dim);
        let sub_dim = dim / num_subspaces;

        let unit_vectors = similarity == SimilarityFunction::DotProduct
            && (0..num_vectors).all(|i| {
                (norm(&data[i * dim..(i + 1) * dim]) - 1.0).abs() <= UNIT_NORM_TOLERANCE
            });

        // Cosine (and unit-mode dot) trains on normalized vectors so the
        // LUT reduces to a plain dot product.
        let angular = similarity == SimilarityFunction::Cosine || unit_vectors;
        let training: Vec<f32> = if angular {
            let mut out = Vec::with_capacity(data.len());
            for i in 0..num_vectors {
                out.extend_from_slice(&normalized(&data[i * dim..(i + 1) * dim]));
            }
            out
        } else {
            data.to_vec()
        };

        let mut codebooks = Vec::with_capacity(num_subspaces);
        for m in 0..num_subspaces {
            let mut subvectors = Vec::with_capacity(num_vectors * sub_dim);
            for i in 0..num_vectors {
                let start = i * dim + m * sub_dim;
                subvectors.extend_from_slice(&training[start..start + sub_dim]);
            }
            let centroids = KMeans::new(sub_dim, CODEBOOK_SIZE.min(num_vectors), seed.wrapping_add(m as u64))
                .fit(&subvectors, num_vectors);
            codebooks.push(centroids);
        }

        Ok(ProductQuantizer {
            dim,
            num_subspaces,
            codebook_size: CODEBOOK_SIZE.min(num_vectors),
            codebooks,
            similarity,
            unit_vectors,
        })
    }

    fn sub_dim(&self) -> usize {
        self.dim / self.num_subspaces
    }

    fn angular(&self) -> bool {
        self.similarity == SimilarityFunction::Cosine || self.unit_vectors
    }

    /// Compress one vector to a code byte per subspace.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let prepared;
        let source: &[f32] = if self.angular() {
            prepared = normalized(vector);
            &prepared
        } else {
            vector
        };

        let sub_dim = self.sub_dim();
        let mut codes = Vec::with_capacity(self.num_subspaces);
        for m in 0..self.num_subspaces {
            let sub = &source[m * sub_dim..(m + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for (k, codeword) in self.codebooks[m].iter().enumerate() {
                let dist = squared_euclidean(sub, codeword);
                if dist < best_dist {
                    best_dist = dist;
                    best = k;
                }
            }
            codes.push(best as u8);
        }
        codes
    }

    /// Per-query lookup table, flat [subspace × codeword]. One table makes
    /// every candidate comparison O(num_subspaces).
    pub fn build_lut(&self, query: &[f32]) -> Vec<f32> {
        let prepared;
        let source: &[f32] = if self.angular() {
            prepared = normalized(query);
            &prepared
        } else {
            query
        };

        let sub_dim = self.sub_dim();
        let mut lut = Vec::with_capacity(self.num_subspaces * self.codebook_size);
        for m in 0..self.num_subspaces {
            let query_sub = &source[m * sub_dim..(m + 1) * sub_dim];
            for codeword in &self.codebooks[m] {
                let entry = match self.similarity {
                    SimilarityFunction::Euclidean => squared_euclidean(query_sub, codeword),
                    _ => dot(query_sub, codeword),
                };
                lut.push(entry);
            }
            // Pad short codebooks so indexing stays uniform.
            for _ in self.codebooks[m].len()..self.codebook_size {
                lut.push(match self.similarity {
                    SimilarityFunction::Euclidean => f32::MAX,
                    _ => f32::MIN,
                });
            }
        }
        lut
    }

    /// Approximate similarity score (same ordering semantics as
    /// `similarity::score`) of an encoded vector against a query LUT.
    pub fn approx_score(&self, codes: &[u8], lut: &[f32]) -> f32 {
        let mut acc = 0.0f32;
        for (m, &code) in codes.iter().enumerate() {
            acc += lut[m * self.codebook_size + code as usize];
        }
        match self.similarity {
            SimilarityFunction::Euclidean => 1.0 / (1.0 + acc),
            _ => acc,
        }
    }
}

/// Largest power-of-two subspace count <= 16 that divides the dimension.
fn subspace_count(dim: usize) -> usize {
    for m in [16usize, 8, 4, 2] {
        if dim % m == 0 && dim / m >= 1 {
            return m;
        }
    }
    1
}
