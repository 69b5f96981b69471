use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::context::QueryContext;
use crate::core::error::Result;
use crate::core::types::{PrimaryKey, SimilarityFunction};
use crate::vector::similarity::{score, validate_vector, vector_bytes};

const NO_ENTRY: u32 = u32::MAX;

/// Result filter over a candidate node's attached row keys.
pub type KeyFilter = dyn Fn(&BTreeSet<PrimaryKey>) -> bool + Sync;

/// Search candidate ordered by score, best first. `total_cmp` keeps the
/// heap NaN-safe.
#[derive(Clone, PartialEq)]
struct Candidate {
    ordinal: u32,
    score: f32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.total_cmp(&other.score)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct GraphNode {
    vector: Arc<Vec<f32>>,
    neighbors: RwLock<Vec<u32>>,
    keys: RwLock<BTreeSet<PrimaryKey>>,
    deleted: AtomicBool,
}

/// Incremental beam-constructed proximity graph backing the per-memtable
/// vector index. Mutated under the memtable's write path while queries
/// read it: node storage only grows, adjacency and row-id sets take
/// per-node locks, deletions are logical until flush.
pub struct VectorGraph {
    dim: usize,
    similarity: SimilarityFunction,
    max_connections: usize,
    beam_width: usize,
    nodes: RwLock<Vec<Arc<GraphNode>>>,
    by_bytes: Mutex<HashMap<Vec<u8>, u32>>,
    entry: AtomicU32,
}

/// Snapshot handed to the segment writer at flush: deleted ordinals are
/// dropped and the remainder renumbered densely.
pub struct GraphExport {
    pub dim: usize,
    pub similarity: SimilarityFunction,
    pub entry: u32,
    pub vectors: Vec<Arc<Vec<f32>>>,
    pub adjacency: Vec<Vec<u32>>,
    pub keys: Vec<Vec<PrimaryKey>>,
}

impl VectorGraph {
    pub fn new(
        dim: usize,
        similarity: SimilarityFunction,
        max_connections: usize,
        beam_width: usize,
    ) -> Self {
        VectorGraph {
            dim,
            similarity,
            max_connections,
            beam_width,
            nodes: RwLock::new(Vec::new()),
            by_bytes: Mutex::new(HashMap::new()),
            entry: AtomicU32::new(NO_ENTRY),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn similarity(&self) -> SimilarityFunction {
        self.similarity
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    /// Rough heap footprint, fed to the segment-buffer limiter.
    pub fn estimated_bytes(&self) -> usize {
        let nodes = self.nodes.read();
        nodes.len() * (self.dim * 4 + self.max_connections * 8 + 64)
    }

    /// Insert one row's vector. A byte-identical vector joins the
    /// existing node; anything else becomes a new node wired through a
    /// beam search.
    pub fn insert(&self, key: PrimaryKey, vector: Vec<f32>) -> Result<()> {
        validate_vector(self.similarity, &vector)?;
        let bytes = vector_bytes(&vector);

        {
            let by_bytes = self.by_bytes.lock();
            if let Some(&ordinal) = by_bytes.get(&bytes) {
                let nodes = self.nodes.read();
                let node = &nodes[ordinal as usize];
                node.keys.write().insert(key);
                node.deleted.store(false, Ordering::Release);
                return Ok(());
            }
        }

        let neighbors = self.nearest(&vector, self.max_connections, self.beam_width, None);

        let node = Arc::new(GraphNode {
            vector: Arc::new(vector),
            neighbors: RwLock::new(neighbors.iter().map(|(o, _)| *o).collect()),
            keys: RwLock::new(BTreeSet::from([key])),
            deleted: AtomicBool::new(false),
        });

        let ordinal = {
            let mut nodes = self.nodes.write();
            let ordinal = nodes.len() as u32;
            nodes.push(Arc::clone(&node));
            ordinal
        };
        self.by_bytes.lock().insert(bytes, ordinal);

        // Backlinks, pruned to twice the connection budget by score.
        let nodes = self.nodes.read();
        for (neighbor, _) in &neighbors {
            let neighbor_node = &nodes[*neighbor as usize];
            let mut adjacency = neighbor_node.neighbors.write();
            adjacency.push(ordinal);
            if adjacency.len() > self.max_connections * 2 {
                let anchor = Arc::clone(&neighbor_node.vector);
                adjacency.sort_by(|a, b| {
                    let sa = score(self.similarity, &anchor, &nodes[*a as usize].vector);
                    let sb = score(self.similarity, &anchor, &nodes[*b as usize].vector);
                    sb.total_cmp(&sa)
                });
                adjacency.truncate(self.max_connections * 2);
            }
        }
        drop(nodes);

        self.entry.compare_exchange(NO_ENTRY, ordinal, Ordering::AcqRel, Ordering::Acquire).ok();
        Ok(())
    }

    /// Remove one row from its node; an emptied node is tombstoned until
    /// flush but stays navigable.
    pub fn remove(&self, key: &PrimaryKey, vector: &[f32]) {
        let bytes = vector_bytes(vector);
        let ordinal = match self.by_bytes.lock().get(&bytes) {
            Some(&ordinal) => ordinal,
            None => return,
        };
        let nodes = self.nodes.read();
        let node = &nodes[ordinal as usize];
        let mut keys = node.keys.write();
        keys.remove(key);
        if keys.is_empty() {
            node.deleted.store(true, Ordering::Release);
        }
    }

    /// Row keys currently attached to an ordinal; empty when the node was
    /// deleted mid-query, which callers skip.
    pub fn keys_for(&self, ordinal: u32) -> Vec<PrimaryKey> {
        let nodes = self.nodes.read();
        match nodes.get(ordinal as usize) {
            Some(node) if !node.deleted.load(Ordering::Acquire) => {
                node.keys.read().iter().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Beam search: ordinals in descending score order. A filter over the
    /// node's row keys restricts which nodes may appear in results;
    /// filtered and tombstoned nodes are still traversed.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        beam: usize,
        ctx: &QueryContext,
        filter: Option<&KeyFilter>,
    ) -> Result<Vec<(u32, f32)>> {
        validate_vector(self.similarity, query)?;
        if !ctx.checkpoint()? {
            return Ok(Vec::new());
        }
        let results = self.nearest_checked(query, limit, beam.max(limit), filter, Some(ctx))?;
        Ok(results)
    }

    fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        beam: usize,
        filter: Option<&KeyFilter>,
    ) -> Vec<(u32, f32)> {
        self.nearest_checked(query, limit, beam, filter, None).unwrap_or_default()
    }

    fn nearest_checked(
        &self,
        query: &[f32],
        limit: usize,
        beam: usize,
        filter: Option<&KeyFilter>,
        ctx: Option<&QueryContext>,
    ) -> Result<Vec<(u32, f32)>> {
        let nodes = self.nodes.read();
        let entry = self.entry.load(Ordering::Acquire);
        if nodes.is_empty() || entry == NO_ENTRY {
            return Ok(Vec::new());
        }

        let usable = |ordinal: u32| -> bool {
            let node = &nodes[ordinal as usize];
            if node.deleted.load(Ordering::Acquire) {
                return false;
            }
            match filter {
                Some(f) => {
                    let keys = node.keys.read();
                    !keys.is_empty() && f(&keys)
                }
                None => true,
            }
        };

        // Max-heap of candidates by score; results kept as a scored set
        // pruned to the beam width.
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut results: Vec<Candidate> = Vec::new();

        let entry_score = score(self.similarity, query, &nodes[entry as usize].vector);
        candidates.push(Candidate { ordinal: entry, score: entry_score });
        visited.insert(entry);

        while let Some(candidate) = candidates.pop() {
            if let Some(ctx) = ctx {
                if !ctx.checkpoint()? {
                    return Ok(Vec::new());
                }
            }
            let worst = results.last().map(|c| c.score).unwrap_or(f32::MIN);
            if results.len() >= beam && candidate.score < worst {
                break;
            }

            if usable(candidate.ordinal) {
                results.push(candidate.clone());
                results.sort_by(|a, b| b.score.total_cmp(&a.score));
                if results.len() > beam {
                    results.pop();
                }
            }

            let neighbors = nodes[candidate.ordinal as usize].neighbors.read().clone();
            for neighbor in neighbors {
                if (neighbor as usize) < nodes.len() && visited.insert(neighbor) {
                    let s = score(self.similarity, query, &nodes[neighbor as usize].vector);
                    candidates.push(Candidate { ordinal: neighbor, score: s });
                }
            }
        }

        results.truncate(limit);
        Ok(results.into_iter().map(|c| (c.ordinal, c.score)).collect())
    }

    /// Dense snapshot for the segment writer; tombstoned ordinals drop
    /// out and edges are renumbered.
    pub fn export(&self) -> GraphExport {
        let nodes = self.nodes.read();
        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut kept: Vec<u32> = Vec::new();
        for (ordinal, node) in nodes.iter().enumerate() {
            if !node.deleted.load(Ordering::Acquire) && !node.keys.read().is_empty() {
                remap.insert(ordinal as u32, kept.len() as u32);
                kept.push(ordinal as u32);
            }
        }

        let mut vectors = Vec::with_capacity(kept.len());
        let mut adjacency = Vec::with_capacity(kept.len());
        let mut keys = Vec::with_capacity(kept.len());
        for &ordinal in &kept {
            let node = &nodes[ordinal as usize];
            vectors.push(Arc::clone(&node.vector));
            adjacency.push(
                node.neighbors
                    .read()
                    .iter()
                    .filter_map(|n| remap.get(n).copied())
                    .collect(),
            );
            keys.push(node.keys.read().iter().cloned().collect());
        }

        let entry = self.entry.load(Ordering::Acquire);
        let entry = remap.get(&entry).copied().unwrap_or(0);

        GraphExport {
            dim: self.dim,
            similarity: self.similarity,
            entry,
            vectors,
            adjacency,
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(id: i64) -> PrimaryKey {
        PrimaryKey::new(id, id.to_be_bytes().to_vec(), vec![])
    }

    fn graph(similarity: SimilarityFunction) -> VectorGraph {
        VectorGraph::new(3, similarity, 8, 32)
    }

    #[test]
    fn search_returns_descending_scores() {
        let g = graph(SimilarityFunction::Euclidean);
        for i in 0..20 {
            g.insert(pk(i), vec![i as f32, 0.0, 0.0]).unwrap();
        }
        let ctx = QueryContext::unbounded();
        let results = g.search(&[7.2, 0.0, 0.0], 5, 32, &ctx, None).unwrap();
        assert_eq!(results.len(), 5);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        // Closest node is value 7.
        assert_eq!(g.keys_for(results[0].0), vec![pk(7)]);
    }

    #[test]
    fn identical_vectors_share_a_node() {
        let g = graph(SimilarityFunction::Cosine);
        g.insert(pk(1), vec![1.0, 2.0, 3.0]).unwrap();
        g.insert(pk(2), vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(g.node_count(), 1);
        let ctx = QueryContext::unbounded();
        let results = g.search(&[1.0, 2.0, 3.0], 4, 16, &ctx, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(g.keys_for(results[0].0), vec![pk(1), pk(2)]);
    }

    #[test]
    fn delete_tombstones_but_keeps_navigability() {
        let g = graph(SimilarityFunction::Euclidean);
        for i in 0..10 {
            g.insert(pk(i), vec![i as f32, 0.0, 0.0]).unwrap();
        }
        g.remove(&pk(5), &[5.0, 0.0, 0.0]);
        let ctx = QueryContext::unbounded();
        let results = g.search(&[5.0, 0.0, 0.0], 3, 32, &ctx, None).unwrap();
        assert!(results.iter().all(|(o, _)| g.keys_for(*o) != vec![pk(5)]));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn shared_node_survives_partial_delete() {
        let g = graph(SimilarityFunction::Euclidean);
        g.insert(pk(1), vec![1.0, 1.0, 1.0]).unwrap();
        g.insert(pk(2), vec![1.0, 1.0, 1.0]).unwrap();
        g.remove(&pk(1), &[1.0, 1.0, 1.0]);
        let ctx = QueryContext::unbounded();
        let results = g.search(&[1.0, 1.0, 1.0], 1, 8, &ctx, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(g.keys_for(results[0].0), vec![pk(2)]);
    }

    #[test]
    fn cosine_rejects_zero_vector_inserts_and_queries() {
        let g = graph(SimilarityFunction::Cosine);
        assert!(g.insert(pk(1), vec![0.0, 0.0, 0.0]).is_err());
        g.insert(pk(1), vec![1.0, 0.0, 0.0]).unwrap();
        let ctx = QueryContext::unbounded();
        assert!(g.search(&[0.0, 0.0, 0.0], 1, 8, &ctx, None).is_err());
    }

    #[test]
    fn filter_restricts_results_not_traversal() {
        let g = graph(SimilarityFunction::Euclidean);
        for i in 0..12 {
            g.insert(pk(i), vec![i as f32, 0.0, 0.0]).unwrap();
        }
        let ctx = QueryContext::unbounded();
        let even_only =
            |keys: &BTreeSet<PrimaryKey>| keys.first().map(|k| k.token % 2 == 0).unwrap_or(false);
        let results = g.search(&[6.0, 0.0, 0.0], 3, 32, &ctx, Some(&even_only)).unwrap();
        assert_eq!(results.len(), 3);
        for (ordinal, _) in &results {
            assert_eq!(g.keys_for(*ordinal)[0].token % 2, 0);
        }
    }

    #[test]
    fn export_renumbers_after_deletes() {
        let g = graph(SimilarityFunction::Euclidean);
        for i in 0..6 {
            g.insert(pk(i), vec![i as f32, 0.0, 0.0]).unwrap();
        }
        g.remove(&pk(2), &[2.0, 0.0, 0.0]);
        let export = g.export();
        assert_eq!(export.vectors.len(), 5);
        assert_eq!(export.keys.len(), 5);
        for edges in &export.adjacency {
            for &e in edges {
                assert!((e as usize) < 5);
            }
        }
    }
}
