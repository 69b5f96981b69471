use std::ops::Bound;

use crate::core::types::{CollectionAspect, ColumnSpec, IndexKind, PrimaryKey};

/// Operators a predicate clause can carry. The NOT family is computed as
/// the complement against the index view's primary-key map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    NotContains,
    ContainsKey,
    NotContainsKey,
    /// `m[k] = v` on an ENTRIES index.
    EntryEq,
}

impl Operator {
    pub fn is_negated(&self) -> bool {
        matches!(self, Operator::NotEq | Operator::NotContains | Operator::NotContainsKey)
    }

    /// The positive operator whose matches get complemented.
    pub fn positive(&self) -> Operator {
        match self {
            Operator::NotEq => Operator::Eq,
            Operator::NotContains => Operator::Contains,
            Operator::NotContainsKey => Operator::ContainsKey,
            other => *other,
        }
    }
}

/// Query-side value of a clause.
#[derive(Debug, Clone)]
pub enum QueryValue {
    /// String term; the index's transform pipeline applies before lookup.
    Text(String),
    /// Pre-encoded byte-comparable term.
    Bytes(Vec<u8>),
    /// Map entry (key, value), composed into an entry term.
    Entry(Vec<u8>, Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub column: String,
    pub operator: Operator,
    pub value: QueryValue,
}

impl Expression {
    pub fn new(column: impl Into<String>, operator: Operator, value: QueryValue) -> Self {
        Expression { column: column.into(), operator, value }
    }
}

/// ANN ordering clause (`ORDER BY col ANN OF q`); the limit comes from
/// the request.
#[derive(Debug, Clone)]
pub struct AnnOrder {
    pub column: String,
    pub query: Vec<f32>,
}

/// Token/partition restriction applied to every matched key.
#[derive(Debug, Clone)]
pub struct PkRange {
    pub lower: Bound<PrimaryKey>,
    pub upper: Bound<PrimaryKey>,
}

impl PkRange {
    pub fn contains(&self, key: &PrimaryKey) -> bool {
        let above = match &self.lower {
            Bound::Included(bound) => key >= bound,
            Bound::Excluded(bound) => key > bound,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(bound) => key <= bound,
            Bound::Excluded(bound) => key < bound,
            Bound::Unbounded => true,
        };
        above && below
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub expressions: Vec<Expression>,
    pub order: Option<AnnOrder>,
    pub range: Option<PkRange>,
    pub limit: usize,
    pub allow_filtering: bool,
}

impl QueryRequest {
    pub fn filter(expressions: Vec<Expression>, limit: usize) -> Self {
        QueryRequest { expressions, order: None, range: None, limit, allow_filtering: false }
    }

    pub fn ann(order: AnnOrder, limit: usize) -> Self {
        QueryRequest { expressions: Vec::new(), order: Some(order), range: None, limit, allow_filtering: false }
    }
}

/// The operator acceptance matrix. Rejected operators surface a typed
/// error before any searcher is consulted.
pub fn operator_supported(spec: &ColumnSpec, operator: Operator) -> bool {
    match spec.kind {
        IndexKind::Literal => match spec.aspect {
            CollectionAspect::Full if spec.frozen => matches!(operator, Operator::Eq),
            CollectionAspect::Full => matches!(
                operator,
                Operator::Eq
                    | Operator::NotEq
                    | Operator::Lt
                    | Operator::Lte
                    | Operator::Gt
                    | Operator::Gte
            ),
            CollectionAspect::Keys => {
                matches!(operator, Operator::ContainsKey | Operator::NotContainsKey)
            }
            CollectionAspect::Values => {
                matches!(operator, Operator::Contains | Operator::NotContains)
            }
            CollectionAspect::Entries => matches!(operator, Operator::EntryEq),
        },
        IndexKind::Numeric => matches!(
            operator,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
        ),
        // Vector indexes serve ANN ordering only.
        IndexKind::Vector => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CollectionAspect;

    #[test]
    fn literal_accepts_equality_and_ranges() {
        let spec = ColumnSpec::literal("v");
        assert!(operator_supported(&spec, Operator::Eq));
        assert!(operator_supported(&spec, Operator::NotEq));
        assert!(operator_supported(&spec, Operator::Gt));
        assert!(!operator_supported(&spec, Operator::Contains));
        assert!(!operator_supported(&spec, Operator::ContainsKey));
    }

    #[test]
    fn frozen_full_is_equality_only() {
        let mut spec = ColumnSpec::literal("v");
        spec.frozen = true;
        assert!(operator_supported(&spec, Operator::Eq));
        assert!(!operator_supported(&spec, Operator::NotEq));
        assert!(!operator_supported(&spec, Operator::Lt));
    }

    #[test]
    fn map_aspects_accept_their_own_operator() {
        let keys = ColumnSpec::map_aspect("m", CollectionAspect::Keys);
        let values = ColumnSpec::map_aspect("m", CollectionAspect::Values);
        let entries = ColumnSpec::map_aspect("m", CollectionAspect::Entries);
        assert!(operator_supported(&keys, Operator::ContainsKey));
        assert!(!operator_supported(&keys, Operator::Contains));
        assert!(operator_supported(&values, Operator::Contains));
        assert!(!operator_supported(&values, Operator::ContainsKey));
        assert!(operator_supported(&entries, Operator::EntryEq));
        assert!(!operator_supported(&entries, Operator::ContainsKey));
    }

    #[test]
    fn vector_rejects_every_predicate_operator() {
        let spec = ColumnSpec::vector("v");
        for operator in [Operator::Eq, Operator::Contains, Operator::Lt, Operator::EntryEq] {
            assert!(!operator_supported(&spec, operator));
        }
    }

    #[test]
    fn pk_range_bounds() {
        let a = PrimaryKey::new(1, b"a".to_vec(), vec![]);
        let b = PrimaryKey::new(2, b"b".to_vec(), vec![]);
        let c = PrimaryKey::new(3, b"c".to_vec(), vec![]);
        let range = PkRange { lower: Bound::Excluded(a.clone()), upper: Bound::Included(c.clone()) };
        assert!(!range.contains(&a));
        assert!(range.contains(&b));
        assert!(range.contains(&c));
    }
}
