use std::sync::Arc;

use crate::analysis::TermTransform;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, IndexKind};
use crate::memtable::MemtableIndex;
use crate::query::expression::{
    operator_supported, AnnOrder, Expression, Operator, PkRange, QueryRequest,
};
use crate::sstable::index::SSTableColumnIndex;

/// Everything the executor can see of one column index: the live
/// memtable index plus the queryable per-SSTable indexes.
#[derive(Clone)]
pub struct ColumnView {
    pub spec: ColumnSpec,
    pub transform: TermTransform,
    pub memtable: Arc<MemtableIndex>,
    pub sstables: Vec<Arc<SSTableColumnIndex>>,
}

pub struct PlannedExpression {
    pub expression: Expression,
    pub view: ColumnView,
}

/// Executable form of a request. The iterator DAG is implied: per-column
/// unions across segments, cross-column intersection, complements for the
/// NOT family, and the filter-then-sort pipeline when ANN ordering is
/// present.
pub struct QueryPlan {
    pub filters: Vec<PlannedExpression>,
    pub order: Option<(AnnOrder, ColumnView)>,
    pub range: Option<PkRange>,
    pub limit: usize,
    /// Views of clauses dropped under ALLOW FILTERING; their union of
    /// indexed rows is the fallback result for host post-filtering.
    pub fallback_views: Vec<ColumnView>,
}

/// Index lookup the engine provides to the planner. `operator` selects
/// among several indexes on one column (map aspects); `None` asks for the
/// ANN-capable index. Returns a typed not-queryable error when the
/// index's build gate rejects queries.
pub trait ViewResolver {
    fn resolve(&self, column: &str, operator: Option<Operator>) -> Result<Option<ColumnView>>;
}

pub fn plan(request: QueryRequest, resolver: &dyn ViewResolver) -> Result<QueryPlan> {
    let mut filters = Vec::new();
    let mut fallback_views = Vec::new();

    for expression in request.expressions {
        let resolved = match resolver.resolve(&expression.column, Some(expression.operator)) {
            Ok(resolved) => resolved,
            Err(err) if err.kind == ErrorKind::NotQueryable && request.allow_filtering => {
                // The host post-filters; this index contributes nothing.
                continue;
            }
            Err(err) => return Err(err),
        };
        match resolved {
            Some(view) => {
                if operator_supported(&view.spec, expression.operator) {
                    filters.push(PlannedExpression { expression, view });
                } else if request.allow_filtering {
                    fallback_views.push(view);
                } else {
                    return Err(Error::unsupported_operator(format!(
                        "operator {:?} is not supported by the index on '{}'",
                        expression.operator, expression.column
                    )));
                }
            }
            None => {
                if !request.allow_filtering {
                    return Err(Error::unsupported_operator(format!(
                        "column '{}' has no index supporting {:?}",
                        expression.column, expression.operator
                    )));
                }
            }
        }
    }

    let order = match request.order {
        Some(order) => {
            let view = resolver.resolve(&order.column, None)?.ok_or_else(|| {
                Error::unsupported_operator(format!(
                    "column '{}' has no vector index for ANN ordering",
                    order.column
                ))
            })?;
            if view.spec.kind != IndexKind::Vector {
                return Err(Error::unsupported_operator(format!(
                    "index on '{}' does not support ANN ordering",
                    order.column
                )));
            }
            Some((order, view))
        }
        None => None,
    };

    if filters.is_empty() && order.is_none() && fallback_views.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "query restricts no indexed column",
        ));
    }

    Ok(QueryPlan {
        filters,
        order,
        range: request.range,
        limit: request.limit,
        fallback_views,
    })
}
