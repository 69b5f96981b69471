use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{IndexKind, RowId};
use crate::literal::writer::LiteralSegmentInfo;
use crate::numeric::writer::NumericSegmentInfo;
use crate::vector::writer::VectorSegmentInfo;

/// Kind-specific region locations of one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SegmentPayload {
    Literal(LiteralSegmentInfo),
    Numeric(NumericSegmentInfo),
    Vector(VectorSegmentInfo),
}

/// One bounded-memory build unit of a per-column index. Row ids are
/// SSTable-wide; the range recorded here drives per-segment planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub min_row: RowId,
    pub max_row: RowId,
    pub row_count: u64,
    pub min_term: Vec<u8>,
    pub max_term: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub payload: SegmentPayload,
}

/// Contents of the per-column META component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub kind: IndexKind,
    pub segments: Vec<SegmentMeta>,
}
