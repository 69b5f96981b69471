use std::collections::{BinaryHeap, HashMap, HashSet};

use roaring::RoaringBitmap;

use crate::core::context::QueryContext;
use crate::core::error::{Error, Result};
use crate::core::types::{RowId, SimilarityFunction};
use crate::storage::handle::FileSlice;
use crate::vector::pq::ProductQuantizer;
use crate::vector::similarity::{score, validate_vector};
use crate::vector::writer::{GraphFile, PqFile};

/// Exact vectors are consulted for this multiple of the limit when PQ
/// scored the traversal.
const RERANK_FACTOR: usize = 4;

#[derive(Clone, PartialEq)]
struct Scored {
    ordinal: u32,
    score: f32,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.total_cmp(&other.score)
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

enum VectorStore {
    /// Uncompressed floats read straight off the map.
    Raw { data: FileSlice, dim: usize },
    /// Decompressed at open.
    Decoded { data: Vec<f32>, dim: usize },
}

impl VectorStore {
    fn vector(&self, ordinal: usize) -> Vec<f32> {
        match self {
            VectorStore::Raw { data, dim } => {
                let bytes = data.bytes();
                let start = ordinal * dim * 4;
                bytes[start..start + dim * 4]
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }
            VectorStore::Decoded { data, dim } => {
                data[ordinal * dim..(ordinal + 1) * dim].to_vec()
            }
        }
    }
}

/// Per-segment ANN searcher over the four persisted regions: graph
/// adjacency, vectors, optional PQ codebook+codes, and the ordinal to
/// row-id map.
pub struct VectorIndexReader {
    dim: usize,
    similarity: SimilarityFunction,
    entry: u32,
    adjacency: Vec<Vec<u32>>,
    store: VectorStore,
    quantizer: Option<ProductQuantizer>,
    codes: Vec<Vec<u8>>,
    rows_by_ordinal: Vec<Vec<RowId>>,
    ordinal_by_row: HashMap<RowId, u32>,
    max_brute_force_rows: usize,
}

impl VectorIndexReader {
    pub fn open(
        graph: FileSlice,
        vectors: FileSlice,
        pq: FileSlice,
        ordinals: FileSlice,
        max_brute_force_rows: usize,
    ) -> Result<Self> {
        let graph_file: GraphFile = bincode::deserialize(graph.bytes())
            .map_err(|e| Error::corruption(format!("ann graph unreadable: {}", e)))?;
        let dim = graph_file.dim as usize;

        let store = Self::open_vectors(&vectors, dim)?;

        let pq_file: PqFile = bincode::deserialize(pq.bytes())
            .map_err(|e| Error::corruption(format!("ann pq unreadable: {}", e)))?;

        let rows_by_ordinal: Vec<Vec<RowId>> = bincode::deserialize(ordinals.bytes())
            .map_err(|e| Error::corruption(format!("ann ordinals unreadable: {}", e)))?;
        if rows_by_ordinal.len() != graph_file.adjacency.len() {
            return Err(Error::corruption("ordinal map does not cover the graph"));
        }
        let mut ordinal_by_row = HashMap::new();
        for (ordinal, rows) in rows_by_ordinal.iter().enumerate() {
            for row in rows {
                ordinal_by_row.insert(*row, ordinal as u32);
            }
        }

        Ok(VectorIndexReader {
            dim,
            similarity: graph_file.similarity,
            entry: graph_file.entry,
            adjacency: graph_file.adjacency,
            store,
            quantizer: pq_file.quantizer,
            codes: pq_file.codes,
            rows_by_ordinal,
            ordinal_by_row,
            max_brute_force_rows,
        })
    }

    fn open_vectors(vectors: &FileSlice, dim: usize) -> Result<VectorStore> {
        let bytes = vectors.bytes();
        if bytes.len() < 9 {
            return Err(Error::corruption("ann vectors header truncated"));
        }
        let stored_dim = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if stored_dim != dim {
            return Err(Error::corruption("ann vectors dimension mismatch"));
        }
        let mode = bytes[8];
        match mode {
            0 => {
                let payload = vectors.slice(9, bytes.len() - 9)?;
                if payload.len() != count * dim * 4 {
                    return Err(Error::corruption("ann vectors truncated"));
                }
                Ok(VectorStore::Raw { data: payload, dim })
            }
            1 => {
                if bytes.len() < 17 {
                    return Err(Error::corruption("ann vectors header truncated"));
                }
                let raw_len = u64::from_le_bytes([
                    bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
                    bytes[16],
                ]) as usize;
                let decompressed = lz4::block::decompress(&bytes[17..], Some(raw_len as i32))
                    .map_err(|e| Error::corruption(format!("ann vectors undecodable: {}", e)))?;
                if decompressed.len() != count * dim * 4 {
                    return Err(Error::corruption("ann vectors truncated"));
                }
                let data = decompressed
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(VectorStore::Decoded { data, dim })
            }
            other => Err(Error::corruption(format!("unknown vectors mode {}", other))),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn similarity(&self) -> SimilarityFunction {
        self.similarity
    }

    pub fn ordinal_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn rows_for(&self, ordinal: u32) -> &[RowId] {
        &self.rows_by_ordinal[ordinal as usize]
    }

    /// Ordinals owning any of the given rows.
    pub fn ordinals_for_rows(&self, rows: &RoaringBitmap) -> RoaringBitmap {
        let mut ordinals = RoaringBitmap::new();
        for row in rows {
            if let Some(&ordinal) = self.ordinal_by_row.get(&row) {
                ordinals.insert(ordinal);
            }
        }
        ordinals
    }

    /// Top-`limit` ordinals by similarity, descending. With an ordinal
    /// filter the strategy is chosen by cost: small candidate sets score
    /// exhaustively, larger ones run the graph with a widening beam until
    /// enough filtered results survive.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        allowed: Option<&RoaringBitmap>,
        ctx: &QueryContext,
    ) -> Result<Vec<(u32, f32)>> {
        validate_vector(self.similarity, query)?;
        if !ctx.checkpoint()? {
            return Ok(Vec::new());
        }
        if limit == 0 || self.adjacency.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(allowed) = allowed {
            if allowed.is_empty() {
                return Ok(Vec::new());
            }
            if allowed.len() as usize <= self.max_brute_force_rows {
                return self.brute_force(query, limit, allowed, ctx);
            }
        }

        self.graph_search(query, limit, allowed, ctx)
    }

    /// Exhaustive scoring over a small candidate set, bypassing the graph
    /// (and PQ: exact vectors are cheap at this scale).
    fn brute_force(
        &self,
        query: &[f32],
        limit: usize,
        allowed: &RoaringBitmap,
        ctx: &QueryContext,
    ) -> Result<Vec<(u32, f32)>> {
        let mut results: Vec<Scored> = Vec::with_capacity(allowed.len() as usize);
        for ordinal in allowed {
            if !ctx.checkpoint()? {
                return Ok(Vec::new());
            }
            if (ordinal as usize) >= self.adjacency.len() {
                continue;
            }
            let vector = self.store.vector(ordinal as usize);
            results.push(Scored { ordinal, score: score(self.similarity, query, &vector) });
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results.into_iter().map(|s| (s.ordinal, s.score)).collect())
    }

    fn graph_search(
        &self,
        query: &[f32],
        limit: usize,
        allowed: Option<&RoaringBitmap>,
        ctx: &QueryContext,
    ) -> Result<Vec<(u32, f32)>> {
        let mut beam = (limit * 2).max(64);
        loop {
            let (results, visited_all) = self.beam_search(query, limit, beam, allowed, ctx)?;
            // Stop once enough filtered results survive or the reachable
            // graph is exhausted; the beam cap covers disconnected rests.
            if results.len() >= limit || visited_all || beam >= self.adjacency.len() * 2 {
                return Ok(results);
            }
            beam *= 2;
        }
    }

    fn beam_search(
        &self,
        query: &[f32],
        limit: usize,
        beam: usize,
        allowed: Option<&RoaringBitmap>,
        ctx: &QueryContext,
    ) -> Result<(Vec<(u32, f32)>, bool)> {
        let lut = self.quantizer.as_ref().map(|q| q.build_lut(query));

        let approx = |ordinal: u32| -> f32 {
            match (&self.quantizer, &lut) {
                (Some(q), Some(lut)) => q.approx_score(&self.codes[ordinal as usize], lut),
                _ => score(self.similarity, query, &self.store.vector(ordinal as usize)),
            }
        };

        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut results: Vec<Scored> = Vec::new();
        let keep = beam.max(limit * RERANK_FACTOR);

        candidates.push(Scored { ordinal: self.entry, score: approx(self.entry) });
        visited.insert(self.entry);

        while let Some(candidate) = candidates.pop() {
            if !ctx.checkpoint()? {
                return Ok((Vec::new(), true));
            }
            let worst = results.last().map(|s| s.score).unwrap_or(f32::MIN);
            if results.len() >= beam && candidate.score < worst {
                break;
            }

            let accepted = match allowed {
                Some(allowed) => allowed.contains(candidate.ordinal),
                None => true,
            };
            if accepted {
                results.push(candidate.clone());
                results.sort_by(|a, b| b.score.total_cmp(&a.score));
                if results.len() > keep {
                    results.pop();
                }
            }

            for &neighbor in &self.adjacency[candidate.ordinal as usize] {
                if visited.insert(neighbor) {
                    candidates.push(Scored { ordinal: neighbor, score: approx(neighbor) });
                }
            }
        }

        let visited_all = visited.len() >= self.adjacency.len();

        // PQ scored the walk; the final order comes from exact vectors.
        let mut exact: Vec<(u32, f32)> = if lut.is_some() {
            results
                .into_iter()
                .take(limit * RERANK_FACTOR)
                .map(|s| {
                    let vector = self.store.vector(s.ordinal as usize);
                    (s.ordinal, score(self.similarity, query, &vector))
                })
                .collect()
        } else {
            results.into_iter().map(|s| (s.ordinal, s.score)).collect()
        };
        exact.sort_by(|a, b| b.1.total_cmp(&a.1));
        exact.truncate(limit);
        Ok((exact, visited_all))
    }
}
