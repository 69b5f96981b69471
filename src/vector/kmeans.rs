use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::vector::similarity::squared_euclidean;

/// Lloyd's k-means over flat (row-major) input; used to train product
/// quantization codebooks, one run per subspace.
pub struct KMeans {
    dim: usize,
    k: usize,
    iterations: usize,
    seed: u64,
}

impl KMeans {
    pub fn new(dim: usize, k: usize, seed: u64) -> Self {
        debug_assert!(dim > 0 && k > 0);
        KMeans { dim, k, iterations: 12, seed }
    }

    pub fn fit(&self, data: &[f32], num_vectors: usize) -> Vec<Vec<f32>> {
        debug_assert_eq!(data.len(), num_vectors * self.dim);
        let k = self.k.min(num_vectors);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut centroids: Vec<Vec<f32>> = (0..k)
            .map(|_| {
                let pick = rng.gen_range(0..num_vectors);
                data[pick * self.dim..(pick + 1) * self.dim].to_vec()
            })
            .collect();
        let mut assignment = vec![0usize; num_vectors];

        for _ in 0..self.iterations {
            let mut moved = false;
            for i in 0..num_vectors {
                let point = &data[i * self.dim..(i + 1) * self.dim];
                let mut best = 0;
                let mut best_dist = f32::MAX;
                for (c, centroid) in centroids.iter().enumerate() {
                    let dist = squared_euclidean(point, centroid);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                if assignment[i] != best {
                    assignment[i] = best;
                    moved = true;
                }
            }

            let mut sums = vec![vec![0.0f32; self.dim]; k];
            let mut counts = vec![0usize; k];
            for i in 0..num_vectors {
                let point = &data[i * self.dim..(i + 1) * self.dim];
                let c = assignment[i];
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(point) {
                    *s += x;
                }
            }
            for c in 0..k {
                if counts[c] == 0 {
                    // Re-seed an empty cluster from a random point.
                    let pick = rng.gen_range(0..num_vectors);
                    centroids[c] = data[pick * self.dim..(pick + 1) * self.dim].to_vec();
                    continue;
                }
                for (target, sum) in centroids[c].iter_mut().zip(&sums[c]) {
                    *target = sum / counts[c] as f32;
                }
            }

            if !moved {
                break;
            }
        }

        centroids
    }
}
