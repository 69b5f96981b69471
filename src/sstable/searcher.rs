use std::ops::Bound;

use crate::core::context::QueryContext;
use crate::core::error::{Error, ErrorKind, Result};
use crate::literal::reader::TermsReader;
use crate::numeric::reader::BkdReader;
use crate::postings::BoxedPostingList;
use crate::sstable::meta::SegmentMeta;
use crate::vector::reader::VectorIndexReader;

/// Per-segment searcher, dispatched once by index kind at open.
pub enum SegmentSearcher {
    Literal { reader: TermsReader, meta: SegmentMeta },
    Numeric { reader: BkdReader, meta: SegmentMeta },
    Vector { reader: VectorIndexReader, meta: SegmentMeta },
}

impl SegmentSearcher {
    pub fn meta(&self) -> &SegmentMeta {
        match self {
            SegmentSearcher::Literal { meta, .. } => meta,
            SegmentSearcher::Numeric { meta, .. } => meta,
            SegmentSearcher::Vector { meta, .. } => meta,
        }
    }

    /// Exact term lookup; posting row ids are SSTable-wide.
    pub fn exact(&self, term: &[u8], ctx: &QueryContext) -> Result<BoxedPostingList> {
        match self {
            SegmentSearcher::Literal { reader, .. } => reader.exact_match(term, ctx),
            SegmentSearcher::Numeric { reader, .. } => reader.exact_match(term, ctx),
            SegmentSearcher::Vector { .. } => Err(Error::new(
                ErrorKind::UnsupportedOperator,
                "vector segments serve ANN ordering only",
            )),
        }
    }

    pub fn range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        post_filter: Option<&dyn Fn(&[u8]) -> bool>,
        ctx: &QueryContext,
    ) -> Result<BoxedPostingList> {
        match self {
            SegmentSearcher::Literal { reader, .. } => {
                reader.range_match(lower, upper, post_filter, ctx)
            }
            SegmentSearcher::Numeric { reader, .. } => reader.range_match(lower, upper, ctx),
            SegmentSearcher::Vector { .. } => Err(Error::new(
                ErrorKind::UnsupportedOperator,
                "vector segments serve ANN ordering only",
            )),
        }
    }

    pub fn as_vector(&self) -> Option<&VectorIndexReader> {
        match self {
            SegmentSearcher::Vector { reader, .. } => Some(reader),
            _ => None,
        }
    }
}
