pub mod literal;
pub mod numeric;
pub mod vector;

use crate::analysis::TermTransform;
use crate::core::config::{EngineConfig, IndexOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ColumnSpec, ColumnValue, IndexKind, PrimaryKey};
use crate::memtable::literal::MemtableLiteralIndex;
use crate::memtable::numeric::MemtableNumericIndex;
use crate::memtable::vector::MemtableVectorIndex;

/// Per-(column, memtable) live index. Created with its memtable,
/// retired when the memtable flushes into an SSTable index.
pub enum MemtableIndex {
    Literal(MemtableLiteralIndex),
    Numeric(MemtableNumericIndex),
    Vector(MemtableVectorIndex),
}

impl MemtableIndex {
    pub fn for_column(spec: &ColumnSpec, options: &IndexOptions, config: &EngineConfig) -> Self {
        match spec.kind {
            IndexKind::Literal => MemtableIndex::Literal(MemtableLiteralIndex::new(
                TermTransform::from_options(options),
                spec.aspect,
                spec.term_size_limit(),
            )),
            IndexKind::Numeric => MemtableIndex::Numeric(MemtableNumericIndex::new()),
            IndexKind::Vector => {
                MemtableIndex::Vector(MemtableVectorIndex::new(options.similarity, config))
            }
        }
    }

    /// Synchronous write-path entry; value shape must match the index
    /// kind. Term-size and vector validation errors surface to the
    /// writing client here.
    pub fn insert(&self, key: PrimaryKey, value: &ColumnValue) -> Result<()> {
        match (self, value) {
            (_, ColumnValue::Null) => Ok(()),
            (MemtableIndex::Literal(index), value) => index.insert_value(key, value),
            (MemtableIndex::Numeric(index), ColumnValue::Term(value)) => {
                index.insert(key, value.clone())
            }
            (MemtableIndex::Vector(index), ColumnValue::Vector(vector)) => {
                index.insert(key, vector.clone())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "column value shape does not match the index kind",
            )),
        }
    }

    /// Remove one row's previous value (overwrites delete-then-insert).
    pub fn remove(&self, key: &PrimaryKey, value: &ColumnValue) -> Result<()> {
        match (self, value) {
            (_, ColumnValue::Null) => Ok(()),
            (MemtableIndex::Literal(index), value) => index.remove_value(key, value),
            (MemtableIndex::Numeric(index), ColumnValue::Term(value)) => {
                index.remove(key, value);
                Ok(())
            }
            (MemtableIndex::Vector(index), ColumnValue::Vector(vector)) => {
                index.remove(key, vector);
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "column value shape does not match the index kind",
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MemtableIndex::Literal(index) => index.is_empty(),
            MemtableIndex::Numeric(index) => index.is_empty(),
            MemtableIndex::Vector(index) => index.is_empty(),
        }
    }

    pub fn estimated_bytes(&self) -> usize {
        match self {
            MemtableIndex::Literal(index) => index.estimated_bytes(),
            MemtableIndex::Numeric(index) => index.estimated_bytes(),
            MemtableIndex::Vector(index) => index.estimated_bytes(),
        }
    }

    pub fn as_literal(&self) -> Option<&MemtableLiteralIndex> {
        match self {
            MemtableIndex::Literal(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&MemtableNumericIndex> {
        match self {
            MemtableIndex::Numeric(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&MemtableVectorIndex> {
        match self {
            MemtableIndex::Vector(index) => Some(index),
            _ => None,
        }
    }
}
