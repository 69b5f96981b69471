use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{RowId, SimilarityFunction};
use crate::vector::pq::ProductQuantizer;

/// Vectors-file compression threshold: small segments stay raw so reads
/// can stay zero-copy off the map.
const COMPRESS_VECTORS_FROM: usize = 4096;

/// One segment's worth of vector data, ordinal-dense, ready to persist.
/// A single vector may be shared by multiple rows.
pub struct VectorSegmentData {
    pub dim: usize,
    pub similarity: SimilarityFunction,
    pub entry: u32,
    pub adjacency: Vec<Vec<u32>>,
    pub vectors: Vec<Vec<f32>>,
    pub row_ids: Vec<Vec<RowId>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphFile {
    pub dim: u32,
    pub similarity: SimilarityFunction,
    pub entry: u32,
    pub adjacency: Vec<Vec<u32>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PqFile {
    pub quantizer: Option<ProductQuantizer>,
    /// Per-ordinal PQ codes; empty when no codebook was trained.
    pub codes: Vec<Vec<u8>>,
}

/// Where one vector segment landed inside the shared component regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSegmentInfo {
    pub graph_offset: u64,
    pub graph_len: u64,
    pub vectors_offset: u64,
    pub vectors_len: u64,
    pub pq_offset: u64,
    pub pq_len: u64,
    pub ordinals_offset: u64,
    pub ordinals_len: u64,
    pub unit_vectors: bool,
}

pub struct VectorSegmentWriter {
    min_pq_rows: usize,
}

impl VectorSegmentWriter {
    pub fn new(min_pq_rows: usize) -> Self {
        VectorSegmentWriter { min_pq_rows }
    }

    pub fn write(
        &self,
        data: &VectorSegmentData,
        graph_out: &mut Vec<u8>,
        vectors_out: &mut Vec<u8>,
        pq_out: &mut Vec<u8>,
        ordinals_out: &mut Vec<u8>,
    ) -> Result<VectorSegmentInfo> {
        let count = data.vectors.len();
        if count == 0 || data.adjacency.len() != count || data.row_ids.len() != count {
            return Err(Error::new(ErrorKind::InvalidArgument, "inconsistent vector segment"));
        }

        // Graph: adjacency lists for mapped random access at query time.
        let graph_offset = graph_out.len() as u64;
        let graph_bytes = bincode::serialize(&GraphFile {
            dim: data.dim as u32,
            similarity: data.similarity,
            entry: data.entry,
            adjacency: data.adjacency.clone(),
        })?;
        graph_out.extend_from_slice(&graph_bytes);

        // Vectors: [dim: u32][count: u32][mode: u8][payload], floats LE.
        let vectors_offset = vectors_out.len() as u64;
        let mut raw = Vec::with_capacity(count * data.dim * 4);
        for vector in &data.vectors {
            if vector.len() != data.dim {
                return Err(Error::new(ErrorKind::InvalidArgument, "vector dimension mismatch"));
            }
            for x in vector {
                raw.extend_from_slice(&x.to_le_bytes());
            }
        }
        vectors_out.extend_from_slice(&(data.dim as u32).to_le_bytes());
        vectors_out.extend_from_slice(&(count as u32).to_le_bytes());
        if raw.len() >= COMPRESS_VECTORS_FROM {
            let compressed = lz4::block::compress(&raw, None, false)?;
            vectors_out.push(1);
            vectors_out.extend_from_slice(&(raw.len() as u64).to_le_bytes());
            vectors_out.extend_from_slice(&compressed);
        } else {
            vectors_out.push(0);
            vectors_out.extend_from_slice(&raw);
        }
        let vectors_len = vectors_out.len() as u64 - vectors_offset;

        // PQ: trained only for segments big enough to amortize it.
        let pq_offset = pq_out.len() as u64;
        let pq_file = if count >= self.min_pq_rows {
            let quantizer =
                ProductQuantizer::train(&raw_floats(&data.vectors), count, data.dim, data.similarity, 0x5eed)?;
            let codes = data.vectors.iter().map(|v| quantizer.encode(v)).collect();
            PqFile { quantizer: Some(quantizer), codes }
        } else {
            PqFile { quantizer: None, codes: Vec::new() }
        };
        let unit_vectors = pq_file
            .quantizer
            .as_ref()
            .map(|q| q.unit_vectors)
            .unwrap_or(false);
        let pq_bytes = bincode::serialize(&pq_file)?;
        pq_out.extend_from_slice(&pq_bytes);

        // Ordinal -> sorted segment row ids.
        let ordinals_offset = ordinals_out.len() as u64;
        for rows in &data.row_ids {
            if rows.is_empty() || !rows.windows(2).all(|w| w[0] < w[1]) {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "ordinal row ids must be non-empty and sorted",
                ));
            }
        }
        let ordinals_bytes = bincode::serialize(&data.row_ids)?;
        ordinals_out.extend_from_slice(&ordinals_bytes);

        Ok(VectorSegmentInfo {
            graph_offset,
            graph_len: graph_bytes.len() as u64,
            vectors_offset,
            vectors_len,
            pq_offset,
            pq_len: pq_bytes.len() as u64,
            ordinals_offset,
            ordinals_len: ordinals_bytes.len() as u64,
            unit_vectors,
        })
    }
}

fn raw_floats(vectors: &[Vec<f32>]) -> Vec<f32> {
    let mut flat = Vec::with_capacity(vectors.len() * vectors.first().map(|v| v.len()).unwrap_or(0));
    for vector in vectors {
        flat.extend_from_slice(vector);
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: usize) -> VectorSegmentData {
        VectorSegmentData {
            dim: 2,
            similarity: SimilarityFunction::Euclidean,
            entry: 0,
            adjacency: (0..count).map(|i| vec![((i + 1) % count) as u32]).collect(),
            vectors: (0..count).map(|i| vec![i as f32, 0.0]).collect(),
            row_ids: (0..count).map(|i| vec![i as RowId]).collect(),
        }
    }

    #[test]
    fn writes_all_four_regions() {
        let writer = VectorSegmentWriter::new(1024);
        let mut graph = Vec::new();
        let mut vectors = Vec::new();
        let mut pq = Vec::new();
        let mut ordinals = Vec::new();
        let info = writer.write(&sample(10), &mut graph, &mut vectors, &mut pq, &mut ordinals).unwrap();
        assert_eq!(info.graph_offset, 0);
        assert!(info.graph_len > 0 && info.vectors_len > 0 && info.pq_len > 0);
        assert!(!info.unit_vectors);
    }

    #[test]
    fn small_segment_skips_pq() {
        let writer = VectorSegmentWriter::new(1024);
        let mut buffers = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        writer
            .write(&sample(16), &mut buffers.0, &mut buffers.1, &mut buffers.2, &mut buffers.3)
            .unwrap();
        let pq: PqFile = bincode::deserialize(&buffers.2).unwrap();
        assert!(pq.quantizer.is_none());
    }

    #[test]
    fn large_segment_trains_pq() {
        let writer = VectorSegmentWriter::new(64);
        let mut buffers = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        writer
            .write(&sample(128), &mut buffers.0, &mut buffers.1, &mut buffers.2, &mut buffers.3)
            .unwrap();
        let pq: PqFile = bincode::deserialize(&buffers.2).unwrap();
        assert!(pq.quantizer.is_some());
        assert_eq!(pq.codes.len(), 128);
    }

    #[test]
    fn rejects_unsorted_ordinal_rows() {
        let writer = VectorSegmentWriter::new(1024);
        let mut data = sample(3);
        data.row_ids[1] = vec![5, 2];
        let mut buffers = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        assert!(writer
            .write(&data, &mut buffers.0, &mut buffers.1, &mut buffers.2, &mut buffers.3)
            .is_err());
    }
}
