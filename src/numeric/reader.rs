use std::ops::Bound;

use crate::core::context::QueryContext;
use crate::core::error::{Error, Result};
use crate::core::types::RowId;
use crate::numeric::writer::KdTreeIndex;
use crate::postings::reader::{read_legacy_list, BlockCache, PostingsReader};
use crate::postings::union::union;
use crate::postings::{BoxedPostingList, EmptyPostingList, VecPostingList};
use crate::storage::component::Version;
use crate::storage::handle::FileSlice;

/// Reads one numeric segment: a range query walks the tree, turning every
/// fully-covered node into its precomputed posting list (when sampled) and
/// filtering points at partially-covered leaves. The resulting forest is
/// unioned.
pub struct BkdReader {
    index: KdTreeIndex,
    postings: FileSlice,
    version: Version,
    cache: Option<BlockCache>,
}

impl BkdReader {
    pub fn open(
        tree: FileSlice,
        postings: FileSlice,
        version: Version,
        cache: Option<BlockCache>,
    ) -> Result<Self> {
        let index: KdTreeIndex = bincode::deserialize(tree.bytes())
            .map_err(|e| Error::corruption(format!("kd-tree unreadable: {}", e)))?;
        Ok(BkdReader { index, postings, version, cache })
    }

    pub fn num_points(&self) -> u64 {
        self.index.num_points
    }

    fn open_postings(&self, offset: u64) -> Result<BoxedPostingList> {
        match self.version {
            Version::Ca => Ok(Box::new(PostingsReader::open(
                self.postings.clone(),
                offset,
                self.cache.clone(),
            )?)),
            Version::Aa => {
                let bytes = self.postings.bytes();
                let at = offset as usize;
                if at + 4 > bytes.len() {
                    return Err(Error::corruption("legacy posting list truncated"));
                }
                let len = u32::from_le_bytes([
                    bytes[at],
                    bytes[at + 1],
                    bytes[at + 2],
                    bytes[at + 3],
                ]) as usize;
                if at + 4 + len > bytes.len() {
                    return Err(Error::corruption("legacy posting list truncated"));
                }
                Ok(Box::new(read_legacy_list(&bytes[at + 4..at + 4 + len])?))
            }
        }
    }

    /// Equality is `[value, value]`.
    pub fn exact_match(&self, value: &[u8], ctx: &QueryContext) -> Result<BoxedPostingList> {
        self.range_match(Bound::Included(value), Bound::Included(value), ctx)
    }

    pub fn range_match(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        ctx: &QueryContext,
    ) -> Result<BoxedPostingList> {
        let mut sources = Vec::new();
        if !self.collect(1, &lower, &upper, ctx, &mut sources)? {
            return Ok(Box::new(EmptyPostingList));
        }
        Ok(union(sources))
    }

    /// Walk from `node`; returns false when the query was cancelled.
    fn collect(
        &self,
        node: usize,
        lower: &Bound<&[u8]>,
        upper: &Bound<&[u8]>,
        ctx: &QueryContext,
        sources: &mut Vec<BoxedPostingList>,
    ) -> Result<bool> {
        if !ctx.checkpoint()? {
            return Ok(false);
        }
        let (node_min, node_max) = match &self.index.node_ranges.get(node) {
            Some(Some(range)) => (&range.0, &range.1),
            _ => return Ok(true),
        };

        if outside(node_min, node_max, lower, upper) {
            return Ok(true);
        }

        if inside(node_min, node_max, lower, upper) {
            if let Some(offset) = self.index.postings_offset(node) {
                sources.push(self.open_postings(offset)?);
                return Ok(true);
            }
            // Fully covered but not sampled: recurse to the leaves.
        }

        if node >= self.index.leaf_base {
            let leaf = node - self.index.leaf_base;
            sources.push(self.filter_leaf(leaf, lower, upper));
            return Ok(true);
        }

        if !self.collect(2 * node, lower, upper, ctx, sources)? {
            return Ok(false);
        }
        self.collect(2 * node + 1, lower, upper, ctx, sources)
    }

    /// Decode a partially-covered leaf and keep the in-range points.
    fn filter_leaf(
        &self,
        leaf: usize,
        lower: &Bound<&[u8]>,
        upper: &Bound<&[u8]>,
    ) -> BoxedPostingList {
        let width = self.index.value_width;
        let values = &self.index.leaf_values[leaf];
        let rows = &self.index.leaf_rows[leaf];
        let mut ids: Vec<RowId> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let value = &values[i * width..(i + 1) * width];
            if value_in_range(value, lower, upper) {
                ids.push(*row);
            }
        }
        Box::new(VecPostingList::from_unsorted(ids))
    }
}

fn value_in_range(value: &[u8], lower: &Bound<&[u8]>, upper: &Bound<&[u8]>) -> bool {
    let above = match lower {
        Bound::Included(bound) => value >= *bound,
        Bound::Excluded(bound) => value > *bound,
        Bound::Unbounded => true,
    };
    let below = match upper {
        Bound::Included(bound) => value <= *bound,
        Bound::Excluded(bound) => value < *bound,
        Bound::Unbounded => true,
    };
    above && below
}

/// Node range entirely outside the query range.
fn outside(node_min: &[u8], node_max: &[u8], lower: &Bound<&[u8]>, upper: &Bound<&[u8]>) -> bool {
    let below_lower = match lower {
        Bound::Included(bound) => node_max < *bound,
        Bound::Excluded(bound) => node_max <= *bound,
        Bound::Unbounded => false,
    };
    let above_upper = match upper {
        Bound::Included(bound) => node_min > *bound,
        Bound::Excluded(bound) => node_min >= *bound,
        Bound::Unbounded => false,
    };
    below_lower || above_upper
}

/// Node range entirely inside the query range.
fn inside(node_min: &[u8], node_max: &[u8], lower: &Bound<&[u8]>, upper: &Bound<&[u8]>) -> bool {
    let above = match lower {
        Bound::Included(bound) => node_min >= *bound,
        Bound::Excluded(bound) => node_min > *bound,
        Bound::Unbounded => true,
    };
    let below = match upper {
        Bound::Included(bound) => node_max <= *bound,
        Bound::Excluded(bound) => node_max < *bound,
        Bound::Unbounded => true,
    };
    above && below
}
