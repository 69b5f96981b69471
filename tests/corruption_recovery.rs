//! Corruption matrix: every component type × {truncated, zero-byte,
//! bit-flip, missing} must be detected at open, leave the index
//! non-queryable, and come back after a rebuild with identical results.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use sai_engine::core::config::EngineConfig;
use sai_engine::core::context::QueryContext;
use sai_engine::core::error::ErrorKind;
use sai_engine::core::types::{ColumnSpec, ColumnValue, PrimaryKey, SSTableId};
use sai_engine::encoding::encode_i32;
use sai_engine::engine::{IndexEngine, SSTableRows};
use sai_engine::query::expression::{Expression, Operator, QueryRequest, QueryValue};

fn pk(id: i64) -> PrimaryKey {
    PrimaryKey::new(id, (id as u64).to_be_bytes().to_vec(), vec![])
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    engine: IndexEngine,
    sstable: SSTableId,
}

fn row(i: i64) -> HashMap<String, ColumnValue> {
    let mut values = HashMap::new();
    values.insert("v1".to_string(), ColumnValue::Term(encode_i32(i as i32).to_vec()));
    values.insert("v2".to_string(), ColumnValue::Text(format!("text{}", i)));
    values
}

/// Two rows over (v1 int, v2 text), flushed to one SSTable.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let engine = IndexEngine::new(&root, EngineConfig::default()).unwrap();
    engine.create_index("v1_idx", ColumnSpec::numeric("v1"), &HashMap::new()).unwrap();
    engine.create_index("v2_idx", ColumnSpec::literal("v2"), &HashMap::new()).unwrap();

    for i in 0..2 {
        engine.index_row(&pk(i), &row(i)).unwrap();
    }
    let sstable = SSTableId::new("nb-1-big");
    engine.flush_memtable(sstable.clone(), vec![pk(0), pk(1)]).unwrap();

    Fixture { _dir: dir, root, engine, sstable }
}

fn numeric_query() -> QueryRequest {
    QueryRequest::filter(
        vec![Expression::new("v1", Operator::Gte, QueryValue::Bytes(encode_i32(0).to_vec()))],
        10,
    )
}

fn literal_query() -> QueryRequest {
    QueryRequest::filter(
        vec![Expression::new("v2", Operator::Eq, QueryValue::Text("text1".to_string()))],
        10,
    )
}

fn component_path(fixture: &Fixture, file_name: &str) -> PathBuf {
    fixture.root.join(file_name)
}

fn rebuild_source(fixture: &Fixture) -> SSTableRows {
    SSTableRows {
        id: fixture.sstable.clone(),
        on_disk_size: 1024,
        rows: (0..2).map(|i| (pk(i), row(i))).collect(),
    }
}

#[derive(Clone, Copy, Debug)]
enum Mode {
    Truncated,
    ZeroBytes,
    BitFlip,
    Missing,
}

fn corrupt(path: &PathBuf, mode: Mode) {
    match mode {
        Mode::Truncated => {
            let data = fs::read(path).unwrap();
            fs::write(path, &data[..data.len() / 2]).unwrap();
        }
        Mode::ZeroBytes => {
            let len = fs::read(path).unwrap().len();
            fs::write(path, vec![0u8; len]).unwrap();
        }
        Mode::BitFlip => {
            let mut data = fs::read(path).unwrap();
            let at = data.len() / 3;
            data[at] ^= 0x10;
            fs::write(path, data).unwrap();
        }
        Mode::Missing => {
            fs::remove_file(path).unwrap();
        }
    }
}

#[test]
fn kd_tree_bit_flip_detected_then_rebuilt() {
    let fixture = fixture();
    let ctx = QueryContext::unbounded();

    let before = fixture.engine.query(numeric_query(), &ctx).unwrap();
    assert_eq!(before.rows.len(), 2);

    let path = component_path(&fixture, "nb-1-big-SAI+CA+v1_idx+KD_TREE.db");
    corrupt(&path, Mode::BitFlip);
    fixture.engine.load_sstable(&fixture.sstable).unwrap();

    let err = fixture.engine.query(numeric_query(), &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotQueryable);
    assert_eq!(fixture.engine.rebuildable_sstables("v1_idx"), vec![fixture.sstable.clone()]);

    // The untouched literal index keeps serving.
    let ok = fixture.engine.query(literal_query(), &ctx).unwrap();
    assert_eq!(ok.rows.len(), 1);

    fixture.engine.rebuild_sstable(&rebuild_source(&fixture)).unwrap();
    let after = fixture.engine.query(numeric_query(), &ctx).unwrap();
    assert_eq!(after.rows, before.rows);
    assert_eq!(fixture.engine.limiter().used(), 0);
}

#[test]
fn corruption_matrix_over_literal_components() {
    let components = [
        "nb-1-big-SAI+CA+v2_idx+TERMS_DATA.db",
        "nb-1-big-SAI+CA+v2_idx+TERMS_FOOTER_POINTER.db",
        "nb-1-big-SAI+CA+v2_idx+POSTING_LISTS.db",
        "nb-1-big-SAI+CA+v2_idx+META.db",
    ];
    for component in components {
        for mode in [Mode::Truncated, Mode::ZeroBytes, Mode::BitFlip, Mode::Missing] {
            let fixture = fixture();
            let ctx = QueryContext::unbounded();
            let before = fixture.engine.query(literal_query(), &ctx).unwrap();

            corrupt(&component_path(&fixture, component), mode);
            fixture.engine.load_sstable(&fixture.sstable).unwrap();

            let err = fixture.engine.query(literal_query(), &ctx).unwrap_err();
            assert_eq!(
                err.kind,
                ErrorKind::NotQueryable,
                "component {} mode {:?}",
                component,
                mode
            );

            fixture.engine.rebuild_sstable(&rebuild_source(&fixture)).unwrap();
            let after = fixture.engine.query(literal_query(), &ctx).unwrap();
            assert_eq!(after.rows, before.rows, "component {} mode {:?}", component, mode);
        }
    }
}

#[test]
fn corruption_matrix_over_shared_components() {
    let components = [
        "nb-1-big-SAI+CA++PRIMARY_KEY_TRIE.db",
        "nb-1-big-SAI+CA++PRIMARY_KEY_BLOCKS.db",
        "nb-1-big-SAI+CA++PRIMARY_KEY_BLOCK_OFFSETS.db",
        "nb-1-big-SAI+CA++TOKEN_VALUES.db",
        "nb-1-big-SAI+CA++OFFSETS_VALUES.db",
    ];
    for component in components {
        for mode in [Mode::Truncated, Mode::BitFlip] {
            let fixture = fixture();
            let ctx = QueryContext::unbounded();

            corrupt(&component_path(&fixture, component), mode);
            fixture.engine.load_sstable(&fixture.sstable).unwrap();

            let err = fixture.engine.query(literal_query(), &ctx).unwrap_err();
            assert_eq!(
                err.kind,
                ErrorKind::NotQueryable,
                "component {} mode {:?}",
                component,
                mode
            );

            fixture.engine.rebuild_sstable(&rebuild_source(&fixture)).unwrap();
            assert_eq!(fixture.engine.query(literal_query(), &ctx).unwrap().rows.len(), 1);
        }
    }
}

#[test]
fn missing_column_marker_means_absent_not_error() {
    let fixture = fixture();
    let ctx = QueryContext::unbounded();

    let marker = component_path(&fixture, "nb-1-big-SAI+CA+v2_idx+COLUMN_COMPLETION_MARKER.db");
    fs::remove_file(marker).unwrap();
    fixture.engine.load_sstable(&fixture.sstable).unwrap();

    // The SSTable no longer contributes; the query succeeds, empty.
    let result = fixture.engine.query(literal_query(), &ctx).unwrap();
    assert!(result.rows.is_empty());
}

#[test]
fn missing_group_marker_hides_the_whole_sstable() {
    let fixture = fixture();
    let ctx = QueryContext::unbounded();

    let marker = component_path(&fixture, "nb-1-big-SAI+CA++GROUP_COMPLETION_MARKER.db");
    fs::remove_file(marker).unwrap();
    fixture.engine.load_sstable(&fixture.sstable).unwrap();

    let result = fixture.engine.query(numeric_query(), &ctx).unwrap();
    assert!(result.rows.is_empty());
}

#[test]
fn injected_build_failure_leaves_no_partial_files_and_fails_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = IndexEngine::new(dir.path(), EngineConfig::default()).unwrap();
    engine
        .faults()
        .arm(sai_engine::core::fault::points::BEFORE_MARKER_WRITE, || {
            Err(sai_engine::core::error::Error::new(ErrorKind::Io, "injected"))
        });

    let source = SSTableRows {
        id: SSTableId::new("nb-9-big"),
        on_disk_size: 64,
        rows: (0..4).map(|i| (pk(i), row(i))).collect(),
    };
    let err = engine
        .create_index_with_build("v1_idx", ColumnSpec::numeric("v1"), &HashMap::new(), &[source])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
    assert_eq!(engine.limiter().used(), 0);
    assert_eq!(engine.builds_in_flight(), 0);

    // No partial component survived the abort.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains("SAI"))
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);

    // The failed build gates queries with a typed error.
    let ctx = QueryContext::unbounded();
    let err = engine.query(numeric_query(), &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotQueryable);
}

#[test]
fn initial_build_groups_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = IndexEngine::new(dir.path(), EngineConfig::default()).unwrap();

    let sources: Vec<SSTableRows> = (0..4)
        .map(|s| SSTableRows {
            id: SSTableId::new(format!("nb-{}-big", s)),
            on_disk_size: 100 + s * 10,
            rows: (0..3)
                .map(|i| {
                    let id = (s * 3 + i) as i64;
                    (pk(id), row(id))
                })
                .collect(),
        })
        .collect();

    engine
        .create_index_with_build("v1_idx", ColumnSpec::numeric("v1"), &HashMap::new(), &sources)
        .unwrap();

    let ctx = QueryContext::unbounded();
    let result = engine.query(numeric_query(), &ctx).unwrap();
    assert_eq!(result.rows.len(), 12);
    assert_eq!(engine.limiter().used(), 0);
}
