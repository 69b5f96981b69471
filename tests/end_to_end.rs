//! End-to-end scenarios driven through the engine: memtable-only reads,
//! reads across a flush, map aspects, complements and ANN ordering.

use std::collections::{BTreeSet, HashMap};

use sai_engine::core::config::EngineConfig;
use sai_engine::core::context::QueryContext;
use sai_engine::core::error::ErrorKind;
use sai_engine::core::types::{ColumnSpec, ColumnValue, PrimaryKey, SSTableId};
use sai_engine::encoding::{encode_bool, encode_i32};
use sai_engine::engine::IndexEngine;
use sai_engine::query::expression::{
    AnnOrder, Expression, Operator, QueryRequest, QueryValue,
};

fn pk(id: i64) -> PrimaryKey {
    PrimaryKey::new(id, (id as u64).to_be_bytes().to_vec(), vec![])
}

fn engine() -> (tempfile::TempDir, IndexEngine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = IndexEngine::new(dir.path(), EngineConfig::default()).unwrap();
    (dir, engine)
}

fn no_options() -> HashMap<String, String> {
    HashMap::new()
}

fn returned_ids(rows: &[sai_engine::query::executor::QueryRow]) -> Vec<i64> {
    rows.iter().map(|row| row.key.token).collect()
}

fn text_row(column: &str, value: &str) -> HashMap<String, ColumnValue> {
    let mut values = HashMap::new();
    values.insert(column.to_string(), ColumnValue::Text(value.to_string()));
    values
}

#[test]
fn literal_exact_match_survives_flush() {
    let (_dir, engine) = engine();
    let options: HashMap<String, String> =
        [("case_sensitive".to_string(), "false".to_string())].into_iter().collect();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &options).unwrap();

    engine.index_row(&pk(1), &text_row("v", "Camel")).unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Eq, QueryValue::Text("camel".to_string()))],
        10,
    );
    let result = engine.query(request.clone(), &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![1]);

    engine.flush_memtable(SSTableId::new("nb-1-big"), vec![pk(1)]).unwrap();
    let result = engine.query(request, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![1]);
    assert_eq!(engine.limiter().used(), 0);
}

fn map_value(entries: &[(i32, &str)]) -> ColumnValue {
    ColumnValue::Map(
        entries
            .iter()
            .map(|(k, v)| (encode_i32(*k).to_vec(), v.as_bytes().to_vec()))
            .collect(),
    )
}

#[test]
fn map_values_contains_and_not_contains() {
    let (_dir, engine) = engine();
    engine
        .create_index(
            "m_values_idx",
            ColumnSpec::map_aspect("m", sai_engine::core::types::CollectionAspect::Values),
            &no_options(),
        )
        .unwrap();

    let row1 = map_value(&[(1, "v1"), (2, "v2")]);
    let row2 = map_value(&[(1, "v1"), (2, "v3")]);
    let mut values1 = HashMap::new();
    values1.insert("m".to_string(), row1.clone());
    let mut values2 = HashMap::new();
    values2.insert("m".to_string(), row2);
    engine.index_row(&pk(1), &values1).unwrap();
    engine.index_row(&pk(2), &values2).unwrap();

    let ctx = QueryContext::unbounded();
    let contains_v1 = QueryRequest::filter(
        vec![Expression::new("m", Operator::Contains, QueryValue::Bytes(b"v1".to_vec()))],
        10,
    );
    let result = engine.query(contains_v1, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![1, 2]);

    let not_contains_v2 = QueryRequest::filter(
        vec![Expression::new("m", Operator::NotContains, QueryValue::Bytes(b"v2".to_vec()))],
        10,
    );
    let result = engine.query(not_contains_v2, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![2]);

    // Overwrite row 1 to {2:'v2'}.
    engine.remove_row(&pk(1), &values1).unwrap();
    let mut overwritten = HashMap::new();
    overwritten.insert("m".to_string(), map_value(&[(2, "v2")]));
    engine.index_row(&pk(1), &overwritten).unwrap();

    let not_contains_v1 = QueryRequest::filter(
        vec![Expression::new("m", Operator::NotContains, QueryValue::Bytes(b"v1".to_vec()))],
        10,
    );
    let result = engine.query(not_contains_v1, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![1]);
}

#[test]
fn not_equal_sees_overwrite_across_flush() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    engine.index_row(&pk(1), &text_row("v", "v1")).unwrap();
    engine.flush_memtable(SSTableId::new("nb-1-big"), vec![pk(1)]).unwrap();

    // Overwrite lands in the fresh memtable; the old value lives in the
    // SSTable.
    engine.index_row(&pk(1), &text_row("v", "v2")).unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::NotEq, QueryValue::Text("v1".to_string()))],
        10,
    );
    let result = engine.query(request, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![1]);
}

#[test]
fn numeric_ranges_memtable_and_sstable() {
    let (_dir, engine) = engine();
    engine.create_index("v1_idx", ColumnSpec::numeric("v1"), &no_options()).unwrap();

    for i in 0..10 {
        let mut values = HashMap::new();
        values.insert("v1".to_string(), ColumnValue::Term(encode_i32(i).to_vec()));
        engine.index_row(&pk(i as i64), &values).unwrap();
    }

    let ctx = QueryContext::unbounded();
    let gte_zero = QueryRequest::filter(
        vec![Expression::new(
            "v1",
            Operator::Gte,
            QueryValue::Bytes(encode_i32(0).to_vec()),
        )],
        100,
    );
    let between = QueryRequest::filter(
        vec![
            Expression::new("v1", Operator::Gte, QueryValue::Bytes(encode_i32(3).to_vec())),
            Expression::new("v1", Operator::Lte, QueryValue::Bytes(encode_i32(7).to_vec())),
        ],
        100,
    );

    let result = engine.query(gte_zero.clone(), &ctx).unwrap();
    assert_eq!(result.rows.len(), 10);
    let result = engine.query(between.clone(), &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![3, 4, 5, 6, 7]);

    engine
        .flush_memtable(SSTableId::new("nb-1-big"), (0..10).map(|i| pk(i as i64)).collect())
        .unwrap();

    let result = engine.query(gte_zero, &ctx).unwrap();
    assert_eq!(result.rows.len(), 10);
    let result = engine.query(between, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![3, 4, 5, 6, 7]);
}

#[test]
fn ann_limit_with_and_without_filter() {
    let (_dir, engine) = engine();
    engine.create_index("vec_idx", ColumnSpec::vector("vec"), &no_options()).unwrap();
    engine.create_index("b_idx", ColumnSpec::literal("b"), &no_options()).unwrap();

    let vectors = [
        vec![1.0f32, 2.0, 3.0],
        vec![2.0, 3.0, 4.0],
        vec![3.0, 4.0, 5.0],
        vec![4.0, 5.0, 6.0],
    ];
    for (i, vector) in vectors.iter().enumerate() {
        let mut values = HashMap::new();
        values.insert("vec".to_string(), ColumnValue::Vector(vector.clone()));
        let b = i < 2;
        values.insert("b".to_string(), ColumnValue::Term(encode_bool(b).to_vec()));
        engine.index_row(&pk(i as i64), &values).unwrap();
    }

    let ctx = QueryContext::unbounded();
    let order = AnnOrder { column: "vec".to_string(), query: vec![2.5, 3.5, 4.5] };
    let result = engine.query(QueryRequest::ann(order.clone(), 3), &ctx).unwrap();
    assert_eq!(result.rows.len(), 3);
    let top_two: BTreeSet<i64> =
        result.rows.iter().take(2).map(|row| row.key.token).collect();
    assert_eq!(top_two, BTreeSet::from([1, 2]));
    for pair in result.rows.windows(2) {
        assert!(pair[0].score.unwrap() >= pair[1].score.unwrap());
    }

    let mut filtered = QueryRequest::ann(order.clone(), 2);
    filtered.expressions.push(Expression::new(
        "b",
        Operator::Eq,
        QueryValue::Bytes(encode_bool(true).to_vec()),
    ));
    let result = engine.query(filtered.clone(), &ctx).unwrap();
    let ids: BTreeSet<i64> = result.rows.iter().map(|row| row.key.token).collect();
    assert_eq!(ids, BTreeSet::from([0, 1]));

    // Same answers once everything is on disk.
    engine
        .flush_memtable(SSTableId::new("nb-1-big"), (0..4).map(|i| pk(i as i64)).collect())
        .unwrap();
    let result = engine.query(QueryRequest::ann(order, 3), &ctx).unwrap();
    let top_two: BTreeSet<i64> =
        result.rows.iter().take(2).map(|row| row.key.token).collect();
    assert_eq!(top_two, BTreeSet::from([1, 2]));
    let result = engine.query(filtered, &ctx).unwrap();
    let ids: BTreeSet<i64> = result.rows.iter().map(|row| row.key.token).collect();
    assert_eq!(ids, BTreeSet::from([0, 1]));
}

#[test]
fn null_vector_rows_never_rank() {
    let (_dir, engine) = engine();
    engine.create_index("vec_idx", ColumnSpec::vector("vec"), &no_options()).unwrap();
    engine.create_index("b_idx", ColumnSpec::literal("b"), &no_options()).unwrap();

    // Row 0 has a vector; row 1 matches the predicate but has none.
    let mut with_vector = HashMap::new();
    with_vector.insert("vec".to_string(), ColumnValue::Vector(vec![1.0, 0.0]));
    with_vector.insert("b".to_string(), ColumnValue::Term(encode_bool(true).to_vec()));
    engine.index_row(&pk(0), &with_vector).unwrap();

    let mut without_vector = HashMap::new();
    without_vector.insert("b".to_string(), ColumnValue::Term(encode_bool(true).to_vec()));
    engine.index_row(&pk(1), &without_vector).unwrap();

    let ctx = QueryContext::unbounded();
    let mut request = QueryRequest::ann(
        AnnOrder { column: "vec".to_string(), query: vec![1.0, 0.0] },
        10,
    );
    request.expressions.push(Expression::new(
        "b",
        Operator::Eq,
        QueryValue::Bytes(encode_bool(true).to_vec()),
    ));
    let result = engine.query(request, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![0]);
}

#[test]
fn unsupported_operator_is_rejected_before_any_search() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Contains, QueryValue::Bytes(b"x".to_vec()))],
        10,
    );
    let err = engine.query(request, &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperator);

    // ALLOW FILTERING downgrades the rejection to "all indexed rows".
    engine.index_row(&pk(7), &text_row("v", "anything")).unwrap();
    let mut request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Contains, QueryValue::Bytes(b"x".to_vec()))],
        10,
    );
    request.allow_filtering = true;
    let result = engine.query(request, &ctx).unwrap();
    assert_eq!(returned_ids(&result.rows), vec![7]);
}

#[test]
fn unindexed_column_requires_allow_filtering() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("other", Operator::Eq, QueryValue::Text("x".to_string()))],
        10,
    );
    let err = engine.query(request, &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperator);
}

#[test]
fn paging_resumes_after_the_last_partition() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    for i in 0..9 {
        engine.index_row(&pk(i), &text_row("v", "same")).unwrap();
    }

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Eq, QueryValue::Text("same".to_string()))],
        100,
    );

    let mut seen = Vec::new();
    let mut resume: Option<PrimaryKey> = None;
    loop {
        let page = engine
            .query_page(request.clone(), &ctx, 4, resume.as_ref())
            .unwrap();
        if page.rows.is_empty() {
            break;
        }
        seen.extend(returned_ids(&page.rows));
        resume = page.resume;
    }
    assert_eq!(seen, (0..9).collect::<Vec<i64>>());
}

#[test]
fn truncate_forgets_everything() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();
    engine.index_row(&pk(1), &text_row("v", "x")).unwrap();
    engine.flush_memtable(SSTableId::new("nb-1-big"), vec![pk(1)]).unwrap();
    engine.index_row(&pk(2), &text_row("v", "x")).unwrap();

    engine.truncate().unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Eq, QueryValue::Text("x".to_string()))],
        10,
    );
    let result = engine.query(request, &ctx).unwrap();
    assert!(result.rows.is_empty());
    assert_eq!(engine.limiter().used(), 0);
}

#[test]
fn drop_index_removes_the_query_surface() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();
    engine.index_row(&pk(1), &text_row("v", "x")).unwrap();
    engine.drop_index("v_idx").unwrap();

    let ctx = QueryContext::unbounded();
    let request = QueryRequest::filter(
        vec![Expression::new("v", Operator::Eq, QueryValue::Text("x".to_string()))],
        10,
    );
    let err = engine.query(request, &ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperator);
}

#[test]
fn duplicate_and_invalid_index_definitions_fail() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    let err = engine
        .create_index("v_idx2", ColumnSpec::literal("v"), &no_options())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOptions);

    let bad: HashMap<String, String> =
        [("similarity_function".to_string(), "cosine".to_string())].into_iter().collect();
    let err = engine.create_index("w_idx", ColumnSpec::literal("w"), &bad).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidOptions);
}

#[test]
fn oversized_term_fails_the_write_synchronously() {
    let (_dir, engine) = engine();
    engine.create_index("v_idx", ColumnSpec::literal("v"), &no_options()).unwrap();

    let err = engine
        .index_row(&pk(1), &text_row("v", &"x".repeat(2000)))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TermTooLarge);
}
