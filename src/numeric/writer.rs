use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RowId;
use crate::postings::writer::PostingsWriter;

/// Serialized skeleton of a one-dimensional block kd-tree. Nodes live in
/// a complete binary tree addressed from 1 (the root); leaves occupy
/// `[leaf_base, leaf_base + num_leaves)`. Every node carries its value
/// range; leaves also carry their value-sorted points. Posting lists for
/// leaves and for sampled internal nodes live in the sibling postings
/// region, addressed through `postings_index`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KdTreeIndex {
    pub value_width: usize,
    pub num_points: u64,
    pub num_leaves: usize,
    /// First node id of the leaf level (next power of two >= num_leaves).
    pub leaf_base: usize,
    /// Per node: (min value, max value); `None` for padding nodes.
    pub node_ranges: Vec<Option<(Vec<u8>, Vec<u8>)>>,
    /// Per leaf: values concatenated at `value_width`, sorted, with the
    /// row id of each point in the parallel array.
    pub leaf_values: Vec<Vec<u8>>,
    pub leaf_rows: Vec<Vec<RowId>>,
    /// node id -> posting-list offset in the postings region.
    pub postings_index: Vec<(u32, u64)>,
}

impl KdTreeIndex {
    pub fn postings_offset(&self, node: usize) -> Option<u64> {
        self.postings_index
            .iter()
            .find(|(id, _)| *id == node as u32)
            .map(|(_, offset)| *offset)
    }

    pub fn level(node: usize) -> u32 {
        debug_assert!(node >= 1);
        (usize::BITS - node.leading_zeros()) as u32
    }
}

/// Where one numeric segment landed inside the shared component regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericSegmentInfo {
    pub tree_offset: u64,
    pub tree_len: u64,
    pub postings_offset: u64,
    pub postings_len: u64,
    pub min_value: Vec<u8>,
    pub max_value: Vec<u8>,
}

pub struct BkdWriter {
    value_width: usize,
    max_points_per_leaf: usize,
    postings_skip: u32,
    postings_min_leaves: u32,
    posting_block_size: usize,
}

impl BkdWriter {
    pub fn new(
        value_width: usize,
        max_points_per_leaf: usize,
        postings_skip: u32,
        postings_min_leaves: u32,
        posting_block_size: usize,
    ) -> Self {
        debug_assert!(postings_skip >= 1 && postings_min_leaves >= 1);
        BkdWriter {
            value_width,
            max_points_per_leaf,
            postings_skip,
            postings_min_leaves,
            posting_block_size,
        }
    }

    /// Build the tree over (value, row id) points and append both regions.
    pub fn write(
        &self,
        mut points: Vec<(Vec<u8>, RowId)>,
        tree_out: &mut Vec<u8>,
        postings_out: &mut Vec<u8>,
    ) -> Result<NumericSegmentInfo> {
        if points.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "empty kd-tree segment"));
        }
        for (value, _) in &points {
            if value.len() != self.value_width {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("value width {} != {}", value.len(), self.value_width),
                ));
            }
        }
        points.sort();

        let num_points = points.len() as u64;
        let leaves: Vec<&[(Vec<u8>, RowId)]> = points.chunks(self.max_points_per_leaf).collect();
        let num_leaves = leaves.len();
        let leaf_base = num_leaves.next_power_of_two();
        let node_count = 2 * leaf_base;

        // Row-sorted id lists per leaf, then merged bottom-up.
        let leaf_postings: Vec<Vec<RowId>> = leaves
            .iter()
            .map(|leaf| {
                let mut ids: Vec<RowId> = leaf.iter().map(|(_, row)| *row).collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            })
            .collect();

        let mut node_ranges: Vec<Option<(Vec<u8>, Vec<u8>)>> = vec![None; node_count];
        let mut leaf_counts = vec![0usize; node_count];
        for (i, leaf) in leaves.iter().enumerate() {
            let node = leaf_base + i;
            node_ranges[node] =
                Some((leaf.first().unwrap().0.clone(), leaf.last().unwrap().0.clone()));
            leaf_counts[node] = 1;
        }
        for node in (1..leaf_base).rev() {
            let (left, right) = (2 * node, 2 * node + 1);
            leaf_counts[node] = leaf_counts[left] + leaf_counts[right];
            node_ranges[node] = match (&node_ranges[left], &node_ranges[right]) {
                (Some((lmin, _)), Some((_, rmax))) => Some((lmin.clone(), rmax.clone())),
                (Some(range), None) => Some(range.clone()),
                (None, Some(range)) => Some(range.clone()),
                (None, None) => None,
            };
        }

        // Write leaf postings, then internal postings for sampled nodes:
        // level % skip == 0 with enough leaves underneath.
        let postings_offset = postings_out.len() as u64;
        let postings_writer = PostingsWriter::new(self.posting_block_size);
        let mut region = Vec::new();
        let mut postings_index = Vec::new();
        for (i, ids) in leaf_postings.iter().enumerate() {
            let offset = postings_writer.write(ids, &mut region)?;
            postings_index.push(((leaf_base + i) as u32, offset));
        }
        for node in 1..leaf_base {
            if leaf_counts[node] == 0 {
                continue;
            }
            let eligible = KdTreeIndex::level(node) % self.postings_skip == 0
                && leaf_counts[node] >= self.postings_min_leaves as usize;
            if !eligible {
                continue;
            }
            let merged = merge_subtree(node, leaf_base, num_leaves, &leaf_postings);
            let offset = postings_writer.write(&merged, &mut region)?;
            postings_index.push((node as u32, offset));
        }
        postings_out.extend_from_slice(&region);

        let min_value = points.first().unwrap().0.clone();
        let max_value = points.last().unwrap().0.clone();

        let index = KdTreeIndex {
            value_width: self.value_width,
            num_points,
            num_leaves,
            leaf_base,
            node_ranges,
            leaf_values: leaves
                .iter()
                .map(|leaf| {
                    let mut packed = Vec::with_capacity(leaf.len() * self.value_width);
                    for (value, _) in leaf.iter() {
                        packed.extend_from_slice(value);
                    }
                    packed
                })
                .collect(),
            leaf_rows: leaves
                .iter()
                .map(|leaf| leaf.iter().map(|(_, row)| *row).collect())
                .collect(),
            postings_index,
        };

        let tree_offset = tree_out.len() as u64;
        let tree_bytes = bincode::serialize(&index)?;
        tree_out.extend_from_slice(&tree_bytes);

        Ok(NumericSegmentInfo {
            tree_offset,
            tree_len: tree_bytes.len() as u64,
            postings_offset,
            postings_len: region.len() as u64,
            min_value,
            max_value,
        })
    }
}

/// Sorted union of the row ids of every leaf under `node`.
fn merge_subtree(
    node: usize,
    leaf_base: usize,
    num_leaves: usize,
    leaf_postings: &[Vec<RowId>],
) -> Vec<RowId> {
    // Leaf span of a complete-subtree node: shift until the leaf level.
    let mut low = node;
    let mut high = node;
    while low < leaf_base {
        low *= 2;
        high = high * 2 + 1;
    }
    let first = low - leaf_base;
    let last = (high - leaf_base).min(num_leaves.saturating_sub(1));

    let mut merged = Vec::new();
    for ids in &leaf_postings[first..=last] {
        merged.extend_from_slice(ids);
    }
    merged.sort_unstable();
    merged.dedup();
    merged
}
