use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, IndexKind};
use crate::literal::reader::TermsReader;
use crate::numeric::reader::BkdReader;
use crate::postings::reader::{new_block_cache, BlockCache};
use crate::sstable::meta::{ColumnMeta, SegmentPayload};
use crate::sstable::primary_key::PrimaryKeyMap;
use crate::sstable::searcher::SegmentSearcher;
use crate::storage::component::{ComponentType, Version};
use crate::storage::handle::FileSlice;
use crate::storage::layout::IndexDescriptor;
use crate::vector::reader::VectorIndexReader;

/// One column's index over one SSTable: validated component slices plus
/// the per-segment metadata. Readers constructed from it share the
/// underlying maps; dropping the index releases files once the last
/// iterator lets go.
pub struct SSTableColumnIndex {
    /// Index name; keys this index's component files.
    pub name: String,
    pub spec: ColumnSpec,
    pub meta: ColumnMeta,
    pub primary_keys: Arc<PrimaryKeyMap>,
    files: HashMap<ComponentType, (Version, FileSlice)>,
    cache: BlockCache,
    max_brute_force_rows: usize,
}

impl SSTableColumnIndex {
    /// Open one column's index. `Ok(None)` means the column has no
    /// completed index on this SSTable (missing marker, not an error);
    /// corruption in any component is a typed error for the caller to
    /// downgrade to non-queryable.
    pub fn open(
        descriptor: &IndexDescriptor,
        name: &str,
        spec: &ColumnSpec,
        primary_keys: Arc<PrimaryKeyMap>,
        config: &EngineConfig,
    ) -> Result<Option<Self>> {
        if !descriptor.component_exists(Some(name), ComponentType::ColumnCompletionMarker) {
            return Ok(None);
        }

        let mut files = HashMap::new();
        for ty in ComponentType::per_column_data(spec.kind) {
            let opened = descriptor.open_component(Some(name), *ty)?;
            files.insert(*ty, opened);
        }

        let meta_slice = &files
            .get(&ComponentType::Meta)
            .ok_or_else(|| Error::corruption("META missing"))?
            .1;
        let meta: ColumnMeta = bincode::deserialize(meta_slice.bytes())
            .map_err(|e| Error::corruption(format!("META unreadable: {}", e)))?;
        if meta.kind != spec.kind {
            return Err(Error::corruption("META kind does not match the index definition"));
        }

        debug!(
            sstable = descriptor.sstable.as_str(),
            index = name,
            segments = meta.segments.len(),
            "opened sstable column index"
        );
        Ok(Some(SSTableColumnIndex {
            name: name.to_string(),
            spec: spec.clone(),
            meta,
            primary_keys,
            files,
            cache: new_block_cache(256),
            max_brute_force_rows: config.max_brute_force_rows,
        }))
    }

    fn slice(&self, ty: ComponentType, offset: u64, len: u64) -> Result<(Version, FileSlice)> {
        let (version, region) = self
            .files
            .get(&ty)
            .ok_or_else(|| Error::new(ErrorKind::Internal, "component not opened"))?;
        Ok((*version, region.slice(offset as usize, len as usize)?))
    }

    /// One searcher per segment, dispatched on the format version
    /// recorded at open.
    pub fn searchers(&self) -> Result<Vec<SegmentSearcher>> {
        let mut searchers = Vec::with_capacity(self.meta.segments.len());
        for segment in &self.meta.segments {
            let searcher = match &segment.payload {
                SegmentPayload::Literal(info) => {
                    let (version, terms) =
                        self.slice(ComponentType::TermsData, info.terms_offset, info.terms_len)?;
                    let (_, postings) = self.slice(
                        ComponentType::PostingLists,
                        info.postings_offset,
                        info.postings_len,
                    )?;
                    SegmentSearcher::Literal {
                        reader: TermsReader::open(
                            terms,
                            postings,
                            version,
                            Some(self.cache.clone()),
                        )?,
                        meta: segment.clone(),
                    }
                }
                SegmentPayload::Numeric(info) => {
                    let (version, tree) =
                        self.slice(ComponentType::KdTree, info.tree_offset, info.tree_len)?;
                    let (_, postings) = self.slice(
                        ComponentType::KdTreePostingLists,
                        info.postings_offset,
                        info.postings_len,
                    )?;
                    SegmentSearcher::Numeric {
                        reader: BkdReader::open(tree, postings, version, Some(self.cache.clone()))?,
                        meta: segment.clone(),
                    }
                }
                SegmentPayload::Vector(info) => {
                    let (_, graph) =
                        self.slice(ComponentType::AnnGraph, info.graph_offset, info.graph_len)?;
                    let (_, vectors) = self.slice(
                        ComponentType::AnnVectors,
                        info.vectors_offset,
                        info.vectors_len,
                    )?;
                    let (_, pq) = self.slice(ComponentType::AnnPq, info.pq_offset, info.pq_len)?;
                    let (_, ordinals) = self.slice(
                        ComponentType::AnnOrdinals,
                        info.ordinals_offset,
                        info.ordinals_len,
                    )?;
                    SegmentSearcher::Vector {
                        reader: VectorIndexReader::open(
                            graph,
                            vectors,
                            pq,
                            ordinals,
                            self.max_brute_force_rows,
                        )?,
                        meta: segment.clone(),
                    }
                }
            };
            searchers.push(searcher);
        }
        Ok(searchers)
    }

    pub fn row_count(&self) -> usize {
        self.primary_keys.count()
    }

    pub fn kind(&self) -> IndexKind {
        self.spec.kind
    }
}
