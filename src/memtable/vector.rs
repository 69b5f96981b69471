use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::core::config::EngineConfig;
use crate::core::context::QueryContext;
use crate::core::error::Result;
use crate::core::types::{PrimaryKey, SimilarityFunction};
use crate::vector::graph::{GraphExport, KeyFilter, VectorGraph};

/// Live vector index for one (column, memtable): the incremental graph,
/// created lazily at the first insert so the dimension comes from the
/// data.
pub struct MemtableVectorIndex {
    similarity: SimilarityFunction,
    max_connections: usize,
    beam_width: usize,
    graph: Mutex<Option<VectorGraph>>,
}

impl MemtableVectorIndex {
    pub fn new(similarity: SimilarityFunction, config: &EngineConfig) -> Self {
        MemtableVectorIndex {
            similarity,
            max_connections: config.max_node_connections,
            beam_width: config.construction_beam_width,
            graph: Mutex::new(None),
        }
    }

    pub fn similarity(&self) -> SimilarityFunction {
        self.similarity
    }

    pub fn insert(&self, key: PrimaryKey, vector: Vec<f32>) -> Result<()> {
        let mut guard = self.graph.lock();
        let graph = guard.get_or_insert_with(|| {
            VectorGraph::new(vector.len(), self.similarity, self.max_connections, self.beam_width)
        });
        graph.insert(key, vector)
    }

    pub fn remove(&self, key: &PrimaryKey, vector: &[f32]) {
        if let Some(graph) = self.graph.lock().as_ref() {
            graph.remove(key, vector);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.lock().as_ref().map(|g| g.is_empty()).unwrap_or(true)
    }

    pub fn estimated_bytes(&self) -> usize {
        self.graph.lock().as_ref().map(|g| g.estimated_bytes()).unwrap_or(0)
    }

    /// Top-`limit` (key, score) pairs in descending score order. The
    /// filter restricts result keys; rows whose vector is null were never
    /// inserted, so they cannot surface.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        ctx: &QueryContext,
        filter: Option<&BTreeSet<PrimaryKey>>,
    ) -> Result<Vec<(PrimaryKey, f32)>> {
        let guard = self.graph.lock();
        let graph = match guard.as_ref() {
            Some(graph) => graph,
            None => return Ok(Vec::new()),
        };

        let key_filter = filter.map(|allowed| {
            let allowed = allowed.clone();
            move |keys: &BTreeSet<PrimaryKey>| keys.iter().any(|k| allowed.contains(k))
        });
        let filter_ref: Option<&KeyFilter> = match &key_filter {
            Some(f) => Some(f as &KeyFilter),
            None => None,
        };

        let beam = (limit * 4).max(self.beam_width);
        let ordinals = graph.search(query, limit * 2, beam, ctx, filter_ref)?;

        let mut out: Vec<(PrimaryKey, f32)> = Vec::new();
        for (ordinal, score) in ordinals {
            for key in graph.keys_for(ordinal) {
                // Deletions racing the query drain the key set; skip.
                if filter.map(|allowed| allowed.contains(&key)).unwrap_or(true) {
                    out.push((key, score));
                }
            }
        }
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out.truncate(limit);
        Ok(out)
    }

    /// Snapshot for the segment writer at flush.
    pub fn export(&self) -> Option<GraphExport> {
        self.graph.lock().as_ref().map(|g| g.export())
    }
}
