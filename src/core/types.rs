use serde::{Serialize, Deserialize};
use crate::encoding;

/// Row identifier within one SSTable index: dense, assigned in primary-key
/// order at build time.
pub type RowId = u32;

/// Sentinel returned by exhausted posting lists.
pub const END_OF_STREAM: RowId = u32::MAX;

/// Host-level hash of the partition key.
pub type Token = i64;

/// Byte limits enforced synchronously on the write path.
pub const MAX_LITERAL_TERM_BYTES: usize = 1024;
pub const MAX_FROZEN_TERM_BYTES: usize = 5 * 1024;
pub const MAX_ANALYZED_BYTES_PER_ROW: usize = 8 * 1024;
pub const MAX_VECTOR_TERM_BYTES: usize = 16 * 1024;

/// Ordered (token, partition key, clustering) tuple. Opaque to the engine
/// except for ordering and the byte-comparable encoding used by the
/// primary-key trie.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub token: Token,
    pub partition: Vec<u8>,
    pub clustering: Vec<u8>,
}

impl PrimaryKey {
    pub fn new(token: Token, partition: Vec<u8>, clustering: Vec<u8>) -> Self {
        PrimaryKey { token, partition, clustering }
    }

    /// Byte-comparable form: lexicographic order of the encoding matches
    /// the tuple order.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.partition.len() + self.clustering.len() + 4);
        out.extend_from_slice(&encoding::encode_i64(self.token));
        encoding::append_escaped(&mut out, &self.partition);
        encoding::append_escaped(&mut out, &self.clustering);
        out
    }

    /// True when both keys belong to the same partition.
    pub fn same_partition(&self, other: &PrimaryKey) -> bool {
        self.token == other.token && self.partition == other.partition
    }
}

/// Identity of a host SSTable, used in component file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SSTableId(pub String);

impl SSTableId {
    pub fn new(name: impl Into<String>) -> Self {
        SSTableId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Discriminated kind of an indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Literal,
    Numeric,
    Vector,
}

/// Which part of a collection column the index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionAspect {
    /// Non-collection column, or `FULL(frozen<...>)`.
    Full,
    Keys,
    Values,
    Entries,
}

/// Similarity function for vector indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityFunction {
    Cosine,
    DotProduct,
    Euclidean,
}

/// One row's value for an indexed column, as handed over by the host
/// write path or a build-time row source.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    /// Pre-encoded byte-comparable term (numerics, booleans, UUIDs,
    /// frozen values).
    Term(Vec<u8>),
    /// String value; the index's transform pipeline applies.
    Text(String),
    /// Collection elements, each already encoded for the index's aspect
    /// (set/list elements, frozen components).
    Collection(Vec<Vec<u8>>),
    /// Map entries as encoded (key, value) pairs; KEYS, VALUES and
    /// ENTRIES indexes each derive their own terms from the same value.
    Map(Vec<(Vec<u8>, Vec<u8>)>),
    Vector(Vec<f32>),
}

/// The indexed column an index definition covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub column: String,
    pub kind: IndexKind,
    pub aspect: CollectionAspect,
    /// True for `FULL(frozen<...>)` indexes: equality only, larger term
    /// budget.
    pub frozen: bool,
}

impl ColumnSpec {
    pub fn literal(column: impl Into<String>) -> Self {
        ColumnSpec {
            column: column.into(),
            kind: IndexKind::Literal,
            aspect: CollectionAspect::Full,
            frozen: false,
        }
    }

    pub fn numeric(column: impl Into<String>) -> Self {
        ColumnSpec {
            column: column.into(),
            kind: IndexKind::Numeric,
            aspect: CollectionAspect::Full,
            frozen: false,
        }
    }

    pub fn vector(column: impl Into<String>) -> Self {
        ColumnSpec {
            column: column.into(),
            kind: IndexKind::Vector,
            aspect: CollectionAspect::Full,
            frozen: false,
        }
    }

    pub fn map_aspect(column: impl Into<String>, aspect: CollectionAspect) -> Self {
        ColumnSpec {
            column: column.into(),
            kind: IndexKind::Literal,
            aspect,
            frozen: false,
        }
    }

    /// Per-kind byte budget for a single indexed term.
    pub fn term_size_limit(&self) -> usize {
        if self.frozen {
            MAX_FROZEN_TERM_BYTES
        } else {
            MAX_LITERAL_TERM_BYTES
        }
    }
}
