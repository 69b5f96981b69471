use std::collections::BTreeMap;
use std::collections::BTreeSet;

use roaring::RoaringBitmap;

use crate::core::context::QueryContext;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::PrimaryKey;
use crate::query::executor::{evaluate_filters, QueryRow};
use crate::query::expression::{AnnOrder, PkRange};
use crate::query::plan::{ColumnView, PlannedExpression};

/// Filter-then-sort pipeline: the non-ANN conjunction is evaluated first,
/// each segment restricts its candidates to that set (choosing brute
/// force or graph search by cost), and the per-segment top-k streams are
/// merged into one globally ranked result.
pub fn execute_ann(
    order: &AnnOrder,
    view: &ColumnView,
    filters: &[PlannedExpression],
    range: Option<&PkRange>,
    limit: usize,
    ctx: &QueryContext,
) -> Result<Vec<QueryRow>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let filter_keys: Option<BTreeSet<PrimaryKey>> = if filters.is_empty() {
        None
    } else {
        let matched = evaluate_filters(filters, &[], range, ctx)?;
        if matched.is_empty() {
            return Ok(Vec::new());
        }
        Some(matched)
    };

    // Best score per key; an overwritten row can surface from both the
    // memtable and an SSTable.
    let mut scored: BTreeMap<PrimaryKey, f32> = BTreeMap::new();

    if let Some(memtable) = view.memtable.as_vector() {
        for (key, score) in memtable.search(&order.query, limit, ctx, filter_keys.as_ref())? {
            merge_score(&mut scored, key, score);
        }
    }

    for sstable in &view.sstables {
        let allowed_rows: Option<RoaringBitmap> = match &filter_keys {
            Some(keys) => {
                let mut rows = RoaringBitmap::new();
                for key in keys {
                    if let Some(row) = sstable.primary_keys.row_id_of(key) {
                        rows.insert(row);
                    }
                }
                if rows.is_empty() {
                    continue;
                }
                Some(rows)
            }
            None => None,
        };

        for searcher in sstable.searchers()? {
            let reader = searcher.as_vector().ok_or_else(|| {
                Error::new(ErrorKind::Internal, "non-vector segment under ANN ordering")
            })?;
            let meta = searcher.meta();

            // Candidates restricted to the segment's row range first.
            let allowed_ordinals = allowed_rows.as_ref().map(|rows| {
                let mut in_range = RoaringBitmap::new();
                for row in rows {
                    if row >= meta.min_row && row <= meta.max_row {
                        in_range.insert(row);
                    }
                }
                reader.ordinals_for_rows(&in_range)
            });
            if allowed_ordinals.as_ref().map(|o| o.is_empty()).unwrap_or(false) {
                continue;
            }

            for (ordinal, score) in
                reader.search(&order.query, limit, allowed_ordinals.as_ref(), ctx)?
            {
                for &row in reader.rows_for(ordinal) {
                    let in_filter = allowed_rows
                        .as_ref()
                        .map(|rows| rows.contains(row))
                        .unwrap_or(true);
                    if !in_filter {
                        continue;
                    }
                    let key = sstable.primary_keys.primary_key(row)?;
                    merge_score(&mut scored, key, score);
                }
            }
        }
    }

    let mut rows: Vec<QueryRow> = scored
        .into_iter()
        .filter(|(key, _)| range.map(|r| r.contains(key)).unwrap_or(true))
        .map(|(key, score)| QueryRow { key, score: Some(score) })
        .collect();
    rows.sort_by(|a, b| {
        b.score
            .unwrap_or(f32::MIN)
            .total_cmp(&a.score.unwrap_or(f32::MIN))
            .then_with(|| a.key.cmp(&b.key))
    });
    rows.truncate(limit);
    Ok(rows)
}

fn merge_score(scored: &mut BTreeMap<PrimaryKey, f32>, key: PrimaryKey, score: f32) {
    scored
        .entry(key)
        .and_modify(|existing| {
            if score > *existing {
                *existing = score;
            }
        })
        .or_insert(score);
}
