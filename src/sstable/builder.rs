use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{debug, warn};

use crate::analysis::TermTransform;
use crate::core::config::{EngineConfig, IndexOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::fault::{points, FaultRegistry};
use crate::core::limiter::SegmentBufferLimiter;
use crate::core::types::{
    ColumnSpec, ColumnValue, IndexKind, PrimaryKey, RowId,
};
use crate::literal::writer::LiteralSegmentWriter;
use crate::numeric::writer::BkdWriter;
use crate::sstable::meta::{ColumnMeta, SegmentMeta, SegmentPayload};
use crate::sstable::primary_key::PrimaryKeyMapWriter;
use crate::storage::component::ComponentType;
use crate::storage::layout::IndexDescriptor;
use crate::vector::graph::{GraphExport, VectorGraph};
use crate::vector::similarity::validate_vector;
use crate::vector::writer::{VectorSegmentData, VectorSegmentWriter};

struct ColumnBuilder {
    /// Index name; keys the per-column component files, so two indexes
    /// over the same column (map keys and values) never collide.
    name: String,
    spec: ColumnSpec,
    options: IndexOptions,
    transform: TermTransform,
    // Open-segment accumulators.
    literal: BTreeMap<Vec<u8>, Vec<RowId>>,
    numeric: Vec<(Vec<u8>, RowId)>,
    numeric_width: Option<usize>,
    vector: Option<VectorGraph>,
    vector_seed: Option<GraphExport>,
    open_rows: u64,
    open_min_row: RowId,
    open_max_row: RowId,
    // Whole-build output.
    regions: HashMap<ComponentType, Vec<u8>>,
    segments: Vec<SegmentMeta>,
}

impl ColumnBuilder {
    fn new(name: String, spec: ColumnSpec, options: IndexOptions) -> Self {
        let transform = TermTransform::from_options(&options);
        ColumnBuilder {
            name,
            spec,
            options,
            transform,
            literal: BTreeMap::new(),
            numeric: Vec::new(),
            numeric_width: None,
            vector: None,
            vector_seed: None,
            open_rows: 0,
            open_min_row: RowId::MAX,
            open_max_row: 0,
            regions: HashMap::new(),
            segments: Vec::new(),
        }
    }

    fn has_open_data(&self) -> bool {
        self.open_rows > 0 || self.vector_seed.is_some()
    }

    fn region(&mut self, ty: ComponentType) -> &mut Vec<u8> {
        self.regions.entry(ty).or_default()
    }

    fn note_row(&mut self, row: RowId) {
        self.open_rows += 1;
        self.open_min_row = self.open_min_row.min(row);
        self.open_max_row = self.open_max_row.max(row);
    }
}

/// Builds every index file of one SSTable: per-column segments under the
/// global segment-buffer limiter, then the shared primary-key map, with
/// completion markers written last. Rows must arrive in primary-key
/// order; row ids are their dense positions.
pub struct SSTableIndexBuilder<'a> {
    descriptor: IndexDescriptor,
    config: &'a EngineConfig,
    limiter: &'a SegmentBufferLimiter,
    faults: &'a FaultRegistry,
    columns: Vec<ColumnBuilder>,
    keys: Vec<PrimaryKey>,
    row_of: HashMap<PrimaryKey, RowId>,
    reserved: usize,
    group_preexisting: bool,
}

impl<'a> SSTableIndexBuilder<'a> {
    pub fn new(
        descriptor: IndexDescriptor,
        columns: Vec<(String, ColumnSpec, IndexOptions)>,
        config: &'a EngineConfig,
        limiter: &'a SegmentBufferLimiter,
        faults: &'a FaultRegistry,
    ) -> Self {
        let group_preexisting =
            descriptor.component_exists(None, ComponentType::GroupCompletionMarker);
        SSTableIndexBuilder {
            descriptor,
            config,
            limiter,
            faults,
            columns: columns
                .into_iter()
                .map(|(name, spec, options)| ColumnBuilder::new(name, spec, options))
                .collect(),
            keys: Vec::new(),
            row_of: HashMap::new(),
            reserved: 0,
            group_preexisting,
        }
    }

    pub fn sstable(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Streaming input path for initial builds and rebuilds.
    pub fn add_row(
        &mut self,
        key: PrimaryKey,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<()> {
        if let Some(last) = self.keys.last() {
            if key <= *last {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "rows must arrive in primary-key order",
                ));
            }
        }
        let row = self.keys.len() as RowId;

        // Reserve before buffering; a denied reservation flushes the open
        // segments and retries blocking.
        let added: usize = values.values().map(estimate_bytes).sum();
        if added > 0 && !self.limiter.try_reserve(added, self.reserved) {
            self.flush_segments()?;
            self.limiter.reserve_blocking(added);
        }
        self.reserved += added;

        self.keys.push(key.clone());
        self.row_of.insert(key.clone(), row);

        for i in 0..self.columns.len() {
            let value = match values.get(&self.columns[i].spec.column) {
                Some(value) => value.clone(),
                None => continue,
            };
            self.accumulate(i, row, &key, value)?;
        }
        Ok(())
    }

    fn accumulate(
        &mut self,
        column: usize,
        row: RowId,
        key: &PrimaryKey,
        value: ColumnValue,
    ) -> Result<()> {
        let config = self.config;
        let cb = &mut self.columns[column];
        match (cb.spec.kind, value) {
            (_, ColumnValue::Null) => Ok(()),
            (IndexKind::Literal, value) => {
                let terms = crate::analysis::literal_terms(&cb.transform, cb.spec.aspect, &value)?;
                if terms.is_empty() {
                    return Ok(());
                }
                for term in terms {
                    check_term_size(&cb.spec, &term)?;
                    cb.literal.entry(term).or_default().push(row);
                }
                cb.note_row(row);
                Ok(())
            }
            (IndexKind::Numeric, ColumnValue::Term(value)) => {
                match cb.numeric_width {
                    Some(width) if width != value.len() => {
                        return Err(Error::new(
                            ErrorKind::InvalidArgument,
                            "numeric value width changed mid-build",
                        ));
                    }
                    None => cb.numeric_width = Some(value.len()),
                    _ => {}
                }
                cb.numeric.push((value, row));
                cb.note_row(row);
                Ok(())
            }
            (IndexKind::Vector, ColumnValue::Vector(vector)) => {
                validate_vector(cb.options.similarity, &vector)?;
                let graph = cb.vector.get_or_insert_with(|| {
                    VectorGraph::new(
                        vector.len(),
                        cb.options.similarity,
                        config.max_node_connections,
                        config.construction_beam_width,
                    )
                });
                graph.insert(key.clone(), vector)?;
                cb.note_row(row);
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "column value shape does not match the index kind",
            )),
        }
    }

    /// Seeding path for memtable flush: the in-memory structures become
    /// the segment writer's input directly, nothing is re-indexed.
    pub fn seed_keys(&mut self, keys: Vec<PrimaryKey>) -> Result<()> {
        if !self.keys.is_empty() {
            return Err(Error::new(ErrorKind::InvalidState, "keys already seeded"));
        }
        for pair in keys.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "seeded keys must be sorted and unique",
                ));
            }
        }
        for (row, key) in keys.iter().enumerate() {
            self.row_of.insert(key.clone(), row as RowId);
        }
        self.keys = keys;
        Ok(())
    }

    pub fn seed_literal(
        &mut self,
        column: &str,
        snapshot: BTreeMap<Vec<u8>, Vec<PrimaryKey>>,
    ) -> Result<()> {
        let index = self.column_position(column)?;
        let row_of = &self.row_of;
        let cb = &mut self.columns[index];
        for (term, keys) in snapshot {
            let mut rows = Vec::with_capacity(keys.len());
            for key in &keys {
                let row = row_of.get(key).copied().ok_or_else(|| {
                    Error::new(ErrorKind::InvalidState, "memtable key missing from flushed set")
                })?;
                rows.push(row);
            }
            rows.sort_unstable();
            rows.dedup();
            for &row in &rows {
                cb.open_min_row = cb.open_min_row.min(row);
                cb.open_max_row = cb.open_max_row.max(row);
            }
            cb.open_rows += rows.len() as u64;
            cb.literal.insert(term, rows);
        }
        Ok(())
    }

    pub fn seed_numeric(
        &mut self,
        column: &str,
        snapshot: Vec<(Vec<u8>, Vec<PrimaryKey>)>,
    ) -> Result<()> {
        let index = self.column_position(column)?;
        let row_of = &self.row_of;
        let cb = &mut self.columns[index];
        for (value, keys) in snapshot {
            match cb.numeric_width {
                Some(width) if width != value.len() => {
                    return Err(Error::new(ErrorKind::InvalidState, "mixed numeric widths"));
                }
                None => cb.numeric_width = Some(value.len()),
                _ => {}
            }
            for key in &keys {
                let row = row_of.get(key).copied().ok_or_else(|| {
                    Error::new(ErrorKind::InvalidState, "memtable key missing from flushed set")
                })?;
                cb.numeric.push((value.clone(), row));
                cb.open_min_row = cb.open_min_row.min(row);
                cb.open_max_row = cb.open_max_row.max(row);
                cb.open_rows += 1;
            }
        }
        Ok(())
    }

    pub fn seed_vector(&mut self, column: &str, export: GraphExport) -> Result<()> {
        let index = self.column_position(column)?;
        if export.vectors.is_empty() {
            return Ok(());
        }
        self.columns[index].vector_seed = Some(export);
        Ok(())
    }

    fn column_position(&self, index_name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|cb| cb.name == index_name)
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound, format!("no builder for '{}'", index_name))
            })
    }

    /// Close the open segment of every column that buffered data.
    fn flush_segments(&mut self) -> Result<()> {
        self.faults.fire(points::BEFORE_SEGMENT_FLUSH)?;
        let config = self.config;
        let row_of = &self.row_of;

        for cb in &mut self.columns {
            if !cb.has_open_data() {
                continue;
            }
            let meta = match cb.spec.kind {
                IndexKind::Literal => {
                    let terms = std::mem::take(&mut cb.literal);
                    let writer = LiteralSegmentWriter::new(config.posting_block_size);
                    let mut terms_region = std::mem::take(cb.region(ComponentType::TermsData));
                    let mut postings_region =
                        std::mem::take(cb.region(ComponentType::PostingLists));
                    let info = writer.write(&terms, &mut terms_region, &mut postings_region)?;
                    *cb.region(ComponentType::TermsData) = terms_region;
                    *cb.region(ComponentType::PostingLists) = postings_region;
                    let pointer = cb.region(ComponentType::TermsFooterPointer);
                    pointer.extend_from_slice(&info.terms_offset.to_le_bytes());
                    pointer.extend_from_slice(&info.postings_offset.to_le_bytes());
                    SegmentMeta {
                        min_row: cb.open_min_row,
                        max_row: cb.open_max_row,
                        row_count: cb.open_rows,
                        min_term: info.min_term.clone(),
                        max_term: info.max_term.clone(),
                        created_at: Utc::now(),
                        payload: SegmentPayload::Literal(info),
                    }
                }
                IndexKind::Numeric => {
                    let points = std::mem::take(&mut cb.numeric);
                    let width = cb.numeric_width.ok_or_else(|| {
                        Error::new(ErrorKind::InvalidState, "numeric segment without width")
                    })?;
                    let writer = BkdWriter::new(
                        width,
                        config.max_points_in_leaf_node,
                        cb.options.bkd_postings_skip,
                        cb.options.bkd_postings_min_leaves,
                        config.posting_block_size,
                    );
                    let mut tree_region = std::mem::take(cb.region(ComponentType::KdTree));
                    let mut postings_region =
                        std::mem::take(cb.region(ComponentType::KdTreePostingLists));
                    let info = writer.write(points, &mut tree_region, &mut postings_region)?;
                    *cb.region(ComponentType::KdTree) = tree_region;
                    *cb.region(ComponentType::KdTreePostingLists) = postings_region;
                    SegmentMeta {
                        min_row: cb.open_min_row,
                        max_row: cb.open_max_row,
                        row_count: cb.open_rows,
                        min_term: info.min_value.clone(),
                        max_term: info.max_value.clone(),
                        created_at: Utc::now(),
                        payload: SegmentPayload::Numeric(info),
                    }
                }
                IndexKind::Vector => {
                    let export = match cb.vector_seed.take() {
                        Some(export) => export,
                        None => match cb.vector.take() {
                            Some(graph) => graph.export(),
                            None => continue,
                        },
                    };
                    let mut row_ids = Vec::with_capacity(export.keys.len());
                    let mut min_row = RowId::MAX;
                    let mut max_row = 0;
                    let mut row_count = 0u64;
                    for keys in &export.keys {
                        let mut rows = Vec::with_capacity(keys.len());
                        for key in keys {
                            let row = row_of.get(key).copied().ok_or_else(|| {
                                Error::new(
                                    ErrorKind::InvalidState,
                                    "vector key missing from flushed set",
                                )
                            })?;
                            rows.push(row);
                        }
                        rows.sort_unstable();
                        rows.dedup();
                        for &row in &rows {
                            min_row = min_row.min(row);
                            max_row = max_row.max(row);
                        }
                        row_count += rows.len() as u64;
                        row_ids.push(rows);
                    }
                    let data = VectorSegmentData {
                        dim: export.dim,
                        similarity: export.similarity,
                        entry: export.entry,
                        adjacency: export.adjacency,
                        vectors: export.vectors.iter().map(|v| v.as_ref().clone()).collect(),
                        row_ids,
                    };
                    let writer = VectorSegmentWriter::new(config.min_pq_rows);
                    let mut graph_region = std::mem::take(cb.region(ComponentType::AnnGraph));
                    let mut vectors_region = std::mem::take(cb.region(ComponentType::AnnVectors));
                    let mut pq_region = std::mem::take(cb.region(ComponentType::AnnPq));
                    let mut ordinals_region =
                        std::mem::take(cb.region(ComponentType::AnnOrdinals));
                    let info = writer.write(
                        &data,
                        &mut graph_region,
                        &mut vectors_region,
                        &mut pq_region,
                        &mut ordinals_region,
                    )?;
                    *cb.region(ComponentType::AnnGraph) = graph_region;
                    *cb.region(ComponentType::AnnVectors) = vectors_region;
                    *cb.region(ComponentType::AnnPq) = pq_region;
                    *cb.region(ComponentType::AnnOrdinals) = ordinals_region;
                    SegmentMeta {
                        min_row,
                        max_row,
                        row_count,
                        min_term: Vec::new(),
                        max_term: Vec::new(),
                        created_at: Utc::now(),
                        payload: SegmentPayload::Vector(info),
                    }
                }
            };
            debug!(
                sstable = self.descriptor.sstable.as_str(),
                column = cb.spec.column.as_str(),
                rows = meta.row_count,
                "flushed index segment"
            );
            cb.segments.push(meta);
            cb.open_rows = 0;
            cb.open_min_row = RowId::MAX;
            cb.open_max_row = 0;
        }

        self.limiter.release(self.reserved);
        self.reserved = 0;
        Ok(())
    }

    /// Final flush, component writes, and completion markers. Any error
    /// cleans up partial files and releases the memory reservation.
    pub fn finish(mut self) -> Result<()> {
        match self.finish_inner() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn finish_inner(&mut self) -> Result<()> {
        self.flush_segments()?;

        for i in 0..self.columns.len() {
            self.faults.fire(points::BEFORE_META_WRITE)?;
            let cb = &mut self.columns[i];
            let kind = cb.spec.kind;
            let name = cb.name.clone();

            for ty in ComponentType::per_column_data(kind) {
                if *ty == ComponentType::Meta {
                    continue;
                }
                let body = cb.regions.remove(ty).unwrap_or_default();
                self.descriptor.write_component(Some(&name), *ty, body)?;
            }
            let meta = ColumnMeta { kind, segments: std::mem::take(&mut cb.segments) };
            self.descriptor.write_component(Some(&name), ComponentType::Meta, bincode::serialize(&meta)?)?;

            self.faults.fire(points::BEFORE_MARKER_WRITE)?;
            self.descriptor.write_marker(Some(&name), ComponentType::ColumnCompletionMarker)?;
        }

        PrimaryKeyMapWriter::write(&self.descriptor, &self.keys, self.faults)?;
        self.descriptor.write_marker(None, ComponentType::GroupCompletionMarker)?;
        debug!(
            sstable = self.descriptor.sstable.as_str(),
            rows = self.keys.len(),
            "sstable index complete"
        );
        Ok(())
    }

    /// Delete partial output and zero the limiter reservation. Shared
    /// per-SSTable files survive when another build published them
    /// before this one started.
    pub fn abort(&mut self) {
        warn!(sstable = self.descriptor.sstable.as_str(), "aborting sstable index build");
        for cb in &self.columns {
            self.descriptor.delete_per_column(&cb.name, cb.spec.kind);
        }
        if !self.group_preexisting {
            self.descriptor.delete_per_sstable();
        }
        if self.reserved > 0 {
            self.limiter.release(self.reserved);
            self.reserved = 0;
        }
    }
}

fn check_term_size(spec: &ColumnSpec, term: &[u8]) -> Result<()> {
    let limit = spec.term_size_limit();
    if term.len() > limit {
        return Err(Error::new(
            ErrorKind::TermTooLarge,
            format!("term of {} bytes exceeds limit {}", term.len(), limit),
        ));
    }
    Ok(())
}

fn estimate_bytes(value: &ColumnValue) -> usize {
    match value {
        ColumnValue::Null => 0,
        ColumnValue::Term(term) => term.len() + 8,
        ColumnValue::Text(text) => text.len() + 8,
        ColumnValue::Collection(terms) => terms.iter().map(|t| t.len() + 8).sum(),
        ColumnValue::Map(entries) => entries.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
        ColumnValue::Vector(vector) => vector.len() * 4 + 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SSTableId;
    use crate::encoding::encode_i32;

    fn pk(id: i64) -> PrimaryKey {
        PrimaryKey::new(id, (id as u64).to_be_bytes().to_vec(), vec![])
    }

    fn build_columns() -> Vec<(String, ColumnSpec, IndexOptions)> {
        vec![
            ("v2_idx".to_string(), ColumnSpec::literal("v2"), IndexOptions::default()),
            ("v1_idx".to_string(), ColumnSpec::numeric("v1"), IndexOptions::default()),
        ]
    }

    #[test]
    fn builds_markers_and_components() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = IndexDescriptor::new(dir.path(), SSTableId::new("nb-1-big"));
        let config = EngineConfig::default();
        let limiter = SegmentBufferLimiter::new(config.segment_buffer_limit);
        let faults = FaultRegistry::new();

        let mut builder =
            SSTableIndexBuilder::new(descriptor.clone(), build_columns(), &config, &limiter, &faults);
        for i in 0..10i64 {
            let mut values = HashMap::new();
            values.insert("v1".to_string(), ColumnValue::Term(encode_i32(i as i32).to_vec()));
            values.insert("v2".to_string(), ColumnValue::Text(format!("text{}", i)));
            builder.add_row(pk(i), &values).unwrap();
        }
        builder.finish().unwrap();

        assert!(descriptor.component_exists(None, ComponentType::GroupCompletionMarker));
        assert!(descriptor.component_exists(Some("v1_idx"), ComponentType::ColumnCompletionMarker));
        assert!(descriptor.component_exists(Some("v2_idx"), ComponentType::ColumnCompletionMarker));
        assert!(descriptor.component_exists(Some("v1_idx"), ComponentType::KdTree));
        assert!(descriptor.component_exists(Some("v2_idx"), ComponentType::TermsData));
        assert_eq!(limiter.used(), 0);
    }

    #[test]
    fn tiny_limit_produces_multiple_segments() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = IndexDescriptor::new(dir.path(), SSTableId::new("nb-2-big"));
        let mut config = EngineConfig::default();
        config.segment_buffer_limit = 64;
        let limiter = SegmentBufferLimiter::new(config.segment_buffer_limit);
        let faults = FaultRegistry::new();

        let mut builder = SSTableIndexBuilder::new(
            descriptor.clone(),
            vec![("v_idx".to_string(), ColumnSpec::literal("v"), IndexOptions::default())],
            &config,
            &limiter,
            &faults,
        );
        for i in 0..40i64 {
            let mut values = HashMap::new();
            values.insert("v".to_string(), ColumnValue::Text(format!("value-{:03}", i)));
            builder.add_row(pk(i), &values).unwrap();
        }
        builder.finish().unwrap();

        let (_, meta_slice) = descriptor.open_component(Some("v_idx"), ComponentType::Meta).unwrap();
        let meta: ColumnMeta = bincode::deserialize(meta_slice.bytes()).unwrap();
        assert!(meta.segments.len() > 1, "expected several segments, got {}", meta.segments.len());
        assert_eq!(meta.segments.iter().map(|s| s.row_count).sum::<u64>(), 40);
        assert_eq!(limiter.used(), 0);
    }

    #[test]
    fn injected_flush_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = IndexDescriptor::new(dir.path(), SSTableId::new("nb-3-big"));
        let config = EngineConfig::default();
        let limiter = SegmentBufferLimiter::new(config.segment_buffer_limit);
        let faults = FaultRegistry::new();
        faults.arm(points::BEFORE_SEGMENT_FLUSH, || {
            Err(Error::new(ErrorKind::Io, "injected flush failure"))
        });

        let mut builder = SSTableIndexBuilder::new(
            descriptor.clone(),
            vec![("v_idx".to_string(), ColumnSpec::literal("v"), IndexOptions::default())],
            &config,
            &limiter,
            &faults,
        );
        let mut values = HashMap::new();
        values.insert("v".to_string(), ColumnValue::Text("x".to_string()));
        builder.add_row(pk(1), &values).unwrap();
        assert!(builder.finish().is_err());

        assert!(!descriptor.component_exists(None, ComponentType::GroupCompletionMarker));
        assert!(!descriptor.component_exists(Some("v_idx"), ComponentType::ColumnCompletionMarker));
        assert!(!descriptor.component_exists(Some("v_idx"), ComponentType::TermsData));
        assert_eq!(limiter.used(), 0);
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = IndexDescriptor::new(dir.path(), SSTableId::new("nb-4-big"));
        let config = EngineConfig::default();
        let limiter = SegmentBufferLimiter::new(config.segment_buffer_limit);
        let faults = FaultRegistry::new();

        let mut builder = SSTableIndexBuilder::new(
            descriptor,
            vec![("v_idx".to_string(), ColumnSpec::literal("v"), IndexOptions::default())],
            &config,
            &limiter,
            &faults,
        );
        let values = HashMap::new();
        builder.add_row(pk(5), &values).unwrap();
        assert!(builder.add_row(pk(3), &values).is_err());
    }
}
