use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use crate::core::context::QueryContext;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::PrimaryKey;
use crate::encoding;
use crate::memtable::MemtableIndex;
use crate::postings;
use crate::postings::range_filter::RangeFilteredPostingList;
use crate::postings::union::union;
use crate::postings::BoxedPostingList;
use crate::query::expression::{Operator, PkRange, QueryValue};
use crate::query::plan::{ColumnView, PlannedExpression, QueryPlan};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub key: PrimaryKey,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
}

/// One page of an ordered result stream, with the key the host hands
/// back to resume.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<QueryRow>,
    pub resume: Option<PrimaryKey>,
}

pub fn execute(plan: &QueryPlan, ctx: &QueryContext) -> Result<QueryResult> {
    let rows = match &plan.order {
        Some((order, view)) => crate::query::ann::execute_ann(
            order,
            view,
            &plan.filters,
            plan.range.as_ref(),
            plan.limit,
            ctx,
        )?,
        None => {
            let matched =
                evaluate_filters(&plan.filters, &plan.fallback_views, plan.range.as_ref(), ctx)?;
            let mut rows: Vec<QueryRow> = matched
                .into_iter()
                .filter(|key| plan.range.as_ref().map(|r| r.contains(key)).unwrap_or(true))
                .map(|key| QueryRow { key, score: None })
                .collect();
            rows.truncate(plan.limit);
            rows
        }
    };
    Ok(QueryResult { rows })
}

/// Paged execution. The host resumes on the partition key following the
/// last returned row's partition, so page boundaries coarsen to partition
/// boundaries; ANN-ordered pages may under-fill.
pub fn execute_page(
    plan: &QueryPlan,
    ctx: &QueryContext,
    page_size: usize,
    resume_after: Option<&PrimaryKey>,
) -> Result<Page> {
    let result = execute(plan, ctx)?;
    let rows: Vec<QueryRow> = result
        .rows
        .into_iter()
        .filter(|row| match resume_after {
            Some(resume) => {
                (row.key.token, &row.key.partition) > (resume.token, &resume.partition)
            }
            None => true,
        })
        .take(page_size)
        .collect();
    let resume = rows.last().map(|row| row.key.clone());
    Ok(Page { rows, resume })
}

/// Conjunction of every planned clause; empty intersection short-circuits.
pub(crate) fn evaluate_filters(
    filters: &[PlannedExpression],
    fallback_views: &[ColumnView],
    range: Option<&PkRange>,
    ctx: &QueryContext,
) -> Result<BTreeSet<PrimaryKey>> {
    let mut matched: Option<BTreeSet<PrimaryKey>> = None;
    for planned in filters {
        let keys = evaluate_one(planned, range, ctx)?;
        matched = Some(match matched {
            Some(current) => current.intersection(&keys).cloned().collect(),
            None => keys,
        });
        if matched.as_ref().map(|m| m.is_empty()).unwrap_or(false) {
            return Ok(BTreeSet::new());
        }
    }
    match matched {
        Some(matched) => Ok(matched),
        None => {
            // Every clause was dropped under ALLOW FILTERING: return all
            // indexed rows for the host to post-filter.
            let mut all = BTreeSet::new();
            for view in fallback_views {
                all.extend(view_all_keys(view, ctx)?);
            }
            Ok(all)
        }
    }
}

/// The positive form of a clause, as byte bounds for the range family or
/// a single term for the equality family.
enum Probe<'a> {
    Exact(&'a [u8]),
    Range(Bound<&'a [u8]>, Bound<&'a [u8]>),
}

fn evaluate_one(
    planned: &PlannedExpression,
    range: Option<&PkRange>,
    ctx: &QueryContext,
) -> Result<BTreeSet<PrimaryKey>> {
    let expression = &planned.expression;
    let view = &planned.view;
    let term = term_bytes(view, &expression.value);

    let probe = match expression.operator.positive() {
        Operator::Eq | Operator::Contains | Operator::ContainsKey | Operator::EntryEq => {
            Probe::Exact(&term[..])
        }
        Operator::Lt => Probe::Range(Bound::Unbounded, Bound::Excluded(&term[..])),
        Operator::Lte => Probe::Range(Bound::Unbounded, Bound::Included(&term[..])),
        Operator::Gt => Probe::Range(Bound::Excluded(&term[..]), Bound::Unbounded),
        Operator::Gte => Probe::Range(Bound::Included(&term[..]), Bound::Unbounded),
        other => {
            return Err(Error::new(
                ErrorKind::Internal,
                format!("operator {:?} escaped planning", other),
            ))
        }
    };

    // The NOT family complements within each view (memtable, each
    // SSTable) before the union: a row overwritten in the memtable must
    // not be cancelled by its stale SSTable match.
    let negated = expression.operator.is_negated();
    let mut keys = BTreeSet::new();

    let memtable_matches = memtable_probe(view, &probe, ctx)?;
    if negated {
        let base = memtable_all_keys(view);
        keys.extend(base.difference(&memtable_matches).cloned());
    } else {
        keys.extend(memtable_matches);
    }

    for sstable in &view.sstables {
        let matches = sstable_probe(sstable, &probe, range, ctx)?;
        if negated {
            for row in 0..sstable.primary_keys.count() {
                let key = sstable.primary_keys.primary_key(row as u32)?;
                if !matches.contains(&key) {
                    keys.insert(key);
                }
            }
        } else {
            keys.extend(matches);
        }
    }
    Ok(keys)
}

fn term_bytes(view: &ColumnView, value: &QueryValue) -> Vec<u8> {
    match value {
        QueryValue::Text(text) => view.transform.query_term(text),
        QueryValue::Bytes(bytes) => bytes.clone(),
        QueryValue::Entry(key, value) => encoding::entry_term(key, value),
    }
}

fn memtable_probe(
    view: &ColumnView,
    probe: &Probe,
    _ctx: &QueryContext,
) -> Result<BTreeSet<PrimaryKey>> {
    match (view.memtable.as_ref(), probe) {
        (MemtableIndex::Literal(index), Probe::Exact(term)) => Ok(index.exact(term)),
        (MemtableIndex::Literal(index), Probe::Range(lower, upper)) => {
            Ok(index.range(*lower, *upper, None))
        }
        (MemtableIndex::Numeric(index), Probe::Exact(term)) => Ok(index.exact(term)),
        (MemtableIndex::Numeric(index), Probe::Range(lower, upper)) => {
            Ok(index.range(*lower, *upper))
        }
        (MemtableIndex::Vector(_), _) => {
            Err(Error::new(ErrorKind::Internal, "predicate against a vector index"))
        }
    }
}

fn sstable_probe(
    sstable: &crate::sstable::index::SSTableColumnIndex,
    probe: &Probe,
    range: Option<&PkRange>,
    ctx: &QueryContext,
) -> Result<BTreeSet<PrimaryKey>> {
    let mut sources: Vec<BoxedPostingList> = Vec::new();
    for searcher in sstable.searchers()? {
        let list = match probe {
            Probe::Exact(term) => searcher.exact(term, ctx)?,
            Probe::Range(lower, upper) => searcher.range(*lower, *upper, None, ctx)?,
        };
        sources.push(list);
    }
    let mut merged = union(sources);

    // Token/partition restrictions drop ids at the posting level, before
    // any key materializes.
    if let Some(range) = range {
        let range = range.clone();
        let pk_map = Arc::clone(&sstable.primary_keys);
        merged = Box::new(RangeFilteredPostingList::new(
            merged,
            Box::new(move |row| Ok(range.contains(&pk_map.primary_key(row)?))),
        ));
    }

    let ids = postings::collect(merged.as_mut())?;
    merged.close()?;
    let mut keys = BTreeSet::new();
    for id in ids {
        keys.insert(sstable.primary_keys.primary_key(id)?);
    }
    Ok(keys)
}

fn memtable_all_keys(view: &ColumnView) -> BTreeSet<PrimaryKey> {
    match view.memtable.as_ref() {
        MemtableIndex::Literal(index) => index.all_keys(),
        MemtableIndex::Numeric(index) => index.all_keys(),
        MemtableIndex::Vector(_) => BTreeSet::new(),
    }
}

/// Every key known to the index's view: live memtable keys plus the
/// primary-key map of each SSTable. The ALLOW FILTERING fallback.
pub(crate) fn view_all_keys(
    view: &ColumnView,
    _ctx: &QueryContext,
) -> Result<BTreeSet<PrimaryKey>> {
    let mut keys = memtable_all_keys(view);
    for sstable in &view.sstables {
        for row in 0..sstable.primary_keys.count() {
            keys.insert(sstable.primary_keys.primary_key(row as u32)?);
        }
    }
    Ok(keys)
}
