use crate::core::error::Result;
use crate::core::types::{RowId, END_OF_STREAM};
use crate::postings::{BoxedPostingList, PostingList};

/// Row-id predicate resolved against the SSTable's primary-key map; used
/// when a query restricts by token or partition range.
pub type RowIdPredicate = Box<dyn FnMut(RowId) -> Result<bool> + Send>;

/// Wraps a source and drops every id the predicate rejects.
pub struct RangeFilteredPostingList {
    source: BoxedPostingList,
    accept: RowIdPredicate,
}

impl RangeFilteredPostingList {
    pub fn new(source: BoxedPostingList, accept: RowIdPredicate) -> Self {
        RangeFilteredPostingList { source, accept }
    }

    fn skip_rejected(&mut self, mut id: RowId) -> Result<RowId> {
        loop {
            if id == END_OF_STREAM {
                return Ok(END_OF_STREAM);
            }
            if (self.accept)(id)? {
                return Ok(id);
            }
            id = self.source.next_posting()?;
        }
    }
}

impl PostingList for RangeFilteredPostingList {
    fn next_posting(&mut self) -> Result<RowId> {
        let id = self.source.next_posting()?;
        self.skip_rejected(id)
    }

    fn advance(&mut self, target: RowId) -> Result<RowId> {
        let id = self.source.advance(target)?;
        self.skip_rejected(id)
    }

    fn size(&self) -> usize {
        self.source.size()
    }

    fn min_row_id(&self) -> RowId {
        self.source.min_row_id()
    }

    fn max_row_id(&self) -> RowId {
        self.source.max_row_id()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}
