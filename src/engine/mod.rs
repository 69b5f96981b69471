use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::analysis::TermTransform;
use crate::core::config::{EngineConfig, IndexOptions};
use crate::core::context::QueryContext;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::fault::FaultRegistry;
use crate::core::limiter::{ColumnsInFlight, SegmentBufferLimiter};
use crate::core::types::{ColumnSpec, ColumnValue, IndexKind, PrimaryKey, SSTableId};
use crate::memtable::MemtableIndex;
use crate::query::executor::{self, Page, QueryResult};
use crate::query::expression::{operator_supported, Operator, QueryRequest};
use crate::query::plan::{self, ColumnView, ViewResolver};
use crate::sstable::builder::SSTableIndexBuilder;
use crate::sstable::index::SSTableColumnIndex;
use crate::sstable::primary_key::PrimaryKeyMap;
use crate::storage::component::ComponentType;
use crate::storage::layout::IndexDescriptor;

/// A user-declared named index over one column.
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub spec: ColumnSpec,
    pub options: IndexOptions,
}

/// Build-time rows of one SSTable, supplied by the host for initial
/// builds and rebuilds. Rows are primary-key sorted.
pub struct SSTableRows {
    pub id: SSTableId,
    pub on_disk_size: u64,
    pub rows: Vec<(PrimaryKey, HashMap<String, ColumnValue>)>,
}

enum BuildState {
    Queryable,
    Building,
    Failed(String),
}

/// Queries against an index whose initial build is running wait here,
/// bounded, then fail typed.
struct BuildGate {
    state: Mutex<BuildState>,
    changed: Condvar,
}

impl BuildGate {
    fn new(state: BuildState) -> Self {
        BuildGate { state: Mutex::new(state), changed: Condvar::new() }
    }

    fn set(&self, state: BuildState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    fn await_queryable(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, BuildState::Building) {
            self.changed.wait_while_for(&mut state, |s| matches!(s, BuildState::Building), timeout);
        }
        match &*state {
            BuildState::Queryable => Ok(()),
            BuildState::Building => {
                Err(Error::not_queryable("initial index build still in progress"))
            }
            BuildState::Failed(reason) => {
                Err(Error::not_queryable(format!("initial index build failed: {}", reason)))
            }
        }
    }
}

struct ColumnIndexState {
    definition: IndexDefinition,
    transform: TermTransform,
    memtable: RwLock<Arc<MemtableIndex>>,
    sstables: RwLock<HashMap<SSTableId, Arc<SSTableColumnIndex>>>,
    /// SSTables whose components failed validation; queryable again after
    /// a rebuild.
    non_queryable: RwLock<HashSet<SSTableId>>,
    gate: BuildGate,
}

impl ColumnIndexState {
    fn new(definition: IndexDefinition, config: &EngineConfig, state: BuildState) -> Self {
        let transform = TermTransform::from_options(&definition.options);
        let memtable =
            MemtableIndex::for_column(&definition.spec, &definition.options, config);
        ColumnIndexState {
            transform,
            memtable: RwLock::new(Arc::new(memtable)),
            sstables: RwLock::new(HashMap::new()),
            non_queryable: RwLock::new(HashSet::new()),
            gate: BuildGate::new(state),
            definition,
        }
    }

    fn fresh_memtable(&self, config: &EngineConfig) {
        let memtable =
            MemtableIndex::for_column(&self.definition.spec, &self.definition.options, config);
        *self.memtable.write() = Arc::new(memtable);
    }
}

/// The index-engine runtime: owns every column index, the global build
/// limiter and the fault registry, and serves the host's write, flush,
/// lifecycle and query entry points.
pub struct IndexEngine {
    config: EngineConfig,
    directory: PathBuf,
    limiter: Arc<SegmentBufferLimiter>,
    faults: Arc<FaultRegistry>,
    columns_in_flight: ColumnsInFlight,
    indexes: RwLock<HashMap<String, Arc<ColumnIndexState>>>,
    pk_maps: RwLock<HashMap<SSTableId, Arc<PrimaryKeyMap>>>,
}

impl IndexEngine {
    pub fn new(directory: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        let limiter = Arc::new(SegmentBufferLimiter::new(config.segment_buffer_limit));
        Ok(IndexEngine {
            config,
            directory,
            limiter,
            faults: Arc::new(FaultRegistry::new()),
            columns_in_flight: ColumnsInFlight::new(),
            indexes: RwLock::new(HashMap::new()),
            pk_maps: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn faults(&self) -> &FaultRegistry {
        &self.faults
    }

    pub fn limiter(&self) -> &SegmentBufferLimiter {
        &self.limiter
    }

    pub fn builds_in_flight(&self) -> usize {
        self.columns_in_flight.current()
    }

    fn descriptor(&self, sstable: &SSTableId) -> IndexDescriptor {
        IndexDescriptor::new(&self.directory, sstable.clone())
    }

    /// DDL entry: validate options, reject duplicates, register the
    /// index. With no existing SSTables the index is queryable at once.
    pub fn create_index(
        &self,
        name: &str,
        spec: ColumnSpec,
        raw_options: &HashMap<String, String>,
    ) -> Result<()> {
        self.register_index(name, spec, raw_options, BuildState::Queryable)?;
        Ok(())
    }

    /// DDL entry over a table with existing SSTables: the initial build
    /// runs grouped to the parallelism target; queries hit the build
    /// gate until it finishes.
    pub fn create_index_with_build(
        &self,
        name: &str,
        spec: ColumnSpec,
        raw_options: &HashMap<String, String>,
        sources: &[SSTableRows],
    ) -> Result<()> {
        let state = self.register_index(name, spec, raw_options, BuildState::Building)?;
        self.columns_in_flight.enter();
        let result = self.run_initial_build(&state, sources);
        self.columns_in_flight.leave();
        match result {
            Ok(()) => {
                state.gate.set(BuildState::Queryable);
                info!(index = name, sstables = sources.len(), "initial index build complete");
                Ok(())
            }
            Err(err) => {
                state.gate.set(BuildState::Failed(err.to_string()));
                warn!(index = name, error = %err, "initial index build failed");
                Err(err)
            }
        }
    }

    fn register_index(
        &self,
        name: &str,
        spec: ColumnSpec,
        raw_options: &HashMap<String, String>,
        state: BuildState,
    ) -> Result<Arc<ColumnIndexState>> {
        let options = IndexOptions::parse(spec.kind, raw_options)?;
        let mut indexes = self.indexes.write();
        if indexes.contains_key(name) {
            return Err(Error::invalid_options(format!("index '{}' already exists", name)));
        }
        let duplicate = indexes.values().any(|existing| {
            existing.definition.spec.column == spec.column
                && existing.definition.spec.aspect == spec.aspect
                && existing.definition.spec.kind == spec.kind
        });
        if duplicate {
            return Err(Error::invalid_options(format!(
                "column '{}' already has an index of this kind",
                spec.column
            )));
        }
        let definition = IndexDefinition { name: name.to_string(), spec, options };
        let state = Arc::new(ColumnIndexState::new(definition, &self.config, state));
        indexes.insert(name.to_string(), Arc::clone(&state));
        Ok(state)
    }

    /// Greedy largest-first grouping to approximately equal cumulative
    /// on-disk bytes, then one worker per group.
    fn run_initial_build(&self, state: &Arc<ColumnIndexState>, sources: &[SSTableRows]) -> Result<()> {
        let groups = group_by_size(sources, self.config.build_parallelism);
        let results: Vec<Result<()>> = groups
            .par_iter()
            .map(|group| {
                for &index in group {
                    self.build_sstable(state, &sources[index])?;
                }
                Ok(())
            })
            .collect();
        for result in results {
            result?;
        }
        for source in sources {
            self.attach_sstable(state, &source.id)?;
        }
        Ok(())
    }

    fn build_sstable(&self, state: &Arc<ColumnIndexState>, source: &SSTableRows) -> Result<()> {
        let definition = &state.definition;
        let mut builder = SSTableIndexBuilder::new(
            self.descriptor(&source.id),
            vec![(definition.name.clone(), definition.spec.clone(), definition.options.clone())],
            &self.config,
            &self.limiter,
            &self.faults,
        );
        for (key, values) in &source.rows {
            builder.add_row(key.clone(), values)?;
        }
        builder.finish()
    }

    fn pk_map(&self, sstable: &SSTableId) -> Result<Arc<PrimaryKeyMap>> {
        if let Some(map) = self.pk_maps.read().get(sstable) {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(PrimaryKeyMap::open(&self.descriptor(sstable))?);
        self.pk_maps.write().insert(sstable.clone(), Arc::clone(&map));
        Ok(map)
    }

    fn attach_sstable(&self, state: &Arc<ColumnIndexState>, sstable: &SSTableId) -> Result<()> {
        let descriptor = self.descriptor(sstable);
        if !descriptor.component_exists(None, ComponentType::GroupCompletionMarker) {
            return Ok(());
        }
        let pk_map = self.pk_map(sstable)?;
        match SSTableColumnIndex::open(
            &descriptor,
            &state.definition.name,
            &state.definition.spec,
            pk_map,
            &self.config,
        )? {
            Some(index) => {
                state.sstables.write().insert(sstable.clone(), Arc::new(index));
                state.non_queryable.write().remove(sstable);
            }
            None => {}
        }
        Ok(())
    }

    /// Synchronous write path: every index covering a written column
    /// updates its live memtable index.
    pub fn index_row(
        &self,
        key: &PrimaryKey,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<()> {
        let indexes = self.indexes.read();
        for state in indexes.values() {
            if let Some(value) = values.get(&state.definition.spec.column) {
                state.memtable.read().insert(key.clone(), value)?;
            }
        }
        Ok(())
    }

    /// Remove a row's previous values ahead of an overwrite or delete.
    pub fn remove_row(
        &self,
        key: &PrimaryKey,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<()> {
        let indexes = self.indexes.read();
        for state in indexes.values() {
            if let Some(value) = values.get(&state.definition.spec.column) {
                state.memtable.read().remove(key, value)?;
            }
        }
        Ok(())
    }

    /// Memtable flush: the live structures seed the segment writer, the
    /// new per-SSTable index is published and the memtable indexes are
    /// retired in the same step.
    pub fn flush_memtable(&self, sstable: SSTableId, keys: Vec<PrimaryKey>) -> Result<()> {
        let indexes = self.indexes.read();
        let states: Vec<Arc<ColumnIndexState>> = indexes.values().cloned().collect();
        drop(indexes);

        let columns: Vec<(String, ColumnSpec, IndexOptions)> = states
            .iter()
            .map(|state| {
                (
                    state.definition.name.clone(),
                    state.definition.spec.clone(),
                    state.definition.options.clone(),
                )
            })
            .collect();
        let mut builder = SSTableIndexBuilder::new(
            self.descriptor(&sstable),
            columns,
            &self.config,
            &self.limiter,
            &self.faults,
        );
        builder.seed_keys(keys)?;
        for state in &states {
            let memtable = state.memtable.read().clone();
            match memtable.as_ref() {
                MemtableIndex::Literal(index) => {
                    builder.seed_literal(&state.definition.name, index.snapshot())?;
                }
                MemtableIndex::Numeric(index) => {
                    builder.seed_numeric(&state.definition.name, index.snapshot())?;
                }
                MemtableIndex::Vector(index) => {
                    if let Some(export) = index.export() {
                        builder.seed_vector(&state.definition.name, export)?;
                    }
                }
            }
        }
        builder.finish()?;

        self.pk_maps.write().remove(&sstable);
        for state in &states {
            self.attach_sstable(state, &sstable)?;
            state.fresh_memtable(&self.config);
        }
        info!(sstable = sstable.as_str(), "memtable indexes flushed and retired");
        Ok(())
    }

    /// (Re)open one SSTable's indexes from disk, e.g. after restart or to
    /// re-validate after suspected corruption. Validation failures mark
    /// the per-column index non-queryable and schedule it for rebuild.
    pub fn load_sstable(&self, sstable: &SSTableId) -> Result<()> {
        let descriptor = self.descriptor(sstable);
        self.pk_maps.write().remove(sstable);
        if !descriptor.component_exists(None, ComponentType::GroupCompletionMarker) {
            // Absent, not an error; anything previously attached retires.
            let indexes = self.indexes.read();
            for state in indexes.values() {
                state.sstables.write().remove(sstable);
            }
            return Ok(());
        }

        let indexes = self.indexes.read();
        for state in indexes.values() {
            state.sstables.write().remove(sstable);
            match self.attach_sstable(state, sstable) {
                Ok(()) => {}
                Err(err) if err.kind == ErrorKind::Corruption => {
                    warn!(
                        sstable = sstable.as_str(),
                        index = state.definition.name.as_str(),
                        error = %err,
                        "index component failed validation; marked non-queryable"
                    );
                    state.non_queryable.write().insert(sstable.clone());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// SSTables needing a rebuild for the given index.
    pub fn rebuildable_sstables(&self, index_name: &str) -> Vec<SSTableId> {
        let indexes = self.indexes.read();
        match indexes.get(index_name) {
            Some(state) => state.non_queryable.read().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Full rebuild of one SSTable's index files from host rows; clears
    /// the non-queryable mark on success.
    pub fn rebuild_sstable(&self, source: &SSTableRows) -> Result<()> {
        let indexes = self.indexes.read();
        let states: Vec<Arc<ColumnIndexState>> = indexes.values().cloned().collect();
        drop(indexes);

        let columns: Vec<(String, ColumnSpec, IndexOptions)> = states
            .iter()
            .map(|state| {
                (
                    state.definition.name.clone(),
                    state.definition.spec.clone(),
                    state.definition.options.clone(),
                )
            })
            .collect();
        let mut builder = SSTableIndexBuilder::new(
            self.descriptor(&source.id),
            columns,
            &self.config,
            &self.limiter,
            &self.faults,
        );
        for (key, values) in &source.rows {
            builder.add_row(key.clone(), values)?;
        }
        builder.finish()?;

        self.pk_maps.write().remove(&source.id);
        for state in &states {
            state.sstables.write().remove(&source.id);
            self.attach_sstable(state, &source.id)?;
            state.non_queryable.write().remove(&source.id);
        }
        info!(sstable = source.id.as_str(), "sstable index rebuilt");
        Ok(())
    }

    /// Drop one index: state and every on-disk per-column file.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        let state = self
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no index '{}'", name)))?;
        let sstables: Vec<SSTableId> = self.pk_maps.read().keys().cloned().collect();
        for sstable in sstables {
            self.descriptor(&sstable).delete_per_column(name, state.definition.spec.kind);
        }
        info!(index = name, "index dropped");
        Ok(())
    }

    /// Truncate: every SSTable index disappears, memtables restart
    /// empty, on-disk files go away.
    pub fn truncate(&self) -> Result<()> {
        let indexes = self.indexes.read();
        let sstables: Vec<SSTableId> = self.pk_maps.read().keys().cloned().collect();
        for state in indexes.values() {
            state.sstables.write().clear();
            state.non_queryable.write().clear();
            state.fresh_memtable(&self.config);
            for sstable in &sstables {
                self.descriptor(sstable).delete_per_column(&state.definition.name, state.definition.spec.kind);
            }
        }
        for sstable in &sstables {
            self.descriptor(sstable).delete_per_sstable();
        }
        self.pk_maps.write().clear();
        Ok(())
    }

    /// The host declared an SSTable obsolete (compaction); its index
    /// files are unlinked once no searcher holds them.
    pub fn remove_sstable(&self, sstable: &SSTableId) {
        let indexes = self.indexes.read();
        for state in indexes.values() {
            state.sstables.write().remove(sstable);
            state.non_queryable.write().remove(sstable);
            self.descriptor(sstable).delete_per_column(&state.definition.name, state.definition.spec.kind);
        }
        self.pk_maps.write().remove(sstable);
        self.descriptor(sstable).delete_per_sstable();
    }

    pub fn query(&self, request: QueryRequest, ctx: &QueryContext) -> Result<QueryResult> {
        let plan = plan::plan(request, self)?;
        executor::execute(&plan, ctx)
    }

    /// Paged query; the host resumes with the key of the last returned
    /// row.
    pub fn query_page(
        &self,
        request: QueryRequest,
        ctx: &QueryContext,
        page_size: usize,
        resume_after: Option<&PrimaryKey>,
    ) -> Result<Page> {
        let plan = plan::plan(request, self)?;
        executor::execute_page(&plan, ctx, page_size, resume_after)
    }

    fn view_of(&self, state: &Arc<ColumnIndexState>) -> Result<ColumnView> {
        state
            .gate
            .await_queryable(Duration::from_millis(self.config.build_gate_timeout_ms))?;
        if !state.non_queryable.read().is_empty() {
            return Err(Error::not_queryable(format!(
                "index '{}' has corrupt sstable components; rebuild required",
                state.definition.name
            )));
        }
        let sstables: Vec<Arc<SSTableColumnIndex>> =
            state.sstables.read().values().cloned().collect();
        Ok(ColumnView {
            spec: state.definition.spec.clone(),
            transform: state.transform.clone(),
            memtable: state.memtable.read().clone(),
            sstables,
        })
    }
}

impl ViewResolver for IndexEngine {
    fn resolve(&self, column: &str, operator: Option<Operator>) -> Result<Option<ColumnView>> {
        let indexes = self.indexes.read();
        let mut candidate: Option<Arc<ColumnIndexState>> = None;
        for state in indexes.values() {
            if state.definition.spec.column != column {
                continue;
            }
            let fits = match operator {
                Some(op) => operator_supported(&state.definition.spec, op),
                None => state.definition.spec.kind == IndexKind::Vector,
            };
            if fits {
                candidate = Some(Arc::clone(state));
                break;
            }
            // Remember a same-column index so unsupported operators are
            // reported against it rather than as "not indexed".
            if candidate.is_none() {
                candidate = Some(Arc::clone(state));
            }
        }
        drop(indexes);
        match candidate {
            Some(state) => Ok(Some(self.view_of(&state)?)),
            None => Ok(None),
        }
    }
}

/// Assign each source to the group with the smallest running total,
/// largest sources first.
fn group_by_size(sources: &[SSTableRows], parallelism: usize) -> Vec<Vec<usize>> {
    let group_count = parallelism.max(1).min(sources.len().max(1));
    let mut order: Vec<usize> = (0..sources.len()).collect();
    order.sort_by(|&a, &b| sources[b].on_disk_size.cmp(&sources[a].on_disk_size));

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); group_count];
    let mut totals = vec![0u64; group_count];
    for index in order {
        let target = totals
            .iter()
            .enumerate()
            .min_by_key(|(_, total)| **total)
            .map(|(g, _)| g)
            .unwrap_or(0);
        groups[target].push(index);
        totals[target] += sources[index].on_disk_size;
    }
    groups.retain(|group| !group.is_empty());
    groups
}
