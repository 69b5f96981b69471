use crate::core::error::Result;
use crate::core::types::{RowId, END_OF_STREAM};
use crate::postings::{BoxedPostingList, EmptyPostingList, PostingList};

/// Build the intersection of the given sources. A single source is
/// returned unwrapped. When the bounds cannot overlap
/// (`max(mins) > min(maxes)`) the result is empty and every input is
/// closed eagerly, before anything is consumed.
pub fn intersect(mut sources: Vec<BoxedPostingList>) -> Result<BoxedPostingList> {
    match sources.len() {
        0 => Ok(Box::new(EmptyPostingList)),
        1 => Ok(sources.pop().unwrap()),
        _ => {
            let global_min = sources.iter().map(|s| s.min_row_id()).max().unwrap_or(END_OF_STREAM);
            let global_max = sources.iter().map(|s| s.max_row_id()).min().unwrap_or(0);
            if global_min > global_max {
                for source in &mut sources {
                    source.close()?;
                }
                return Ok(Box::new(EmptyPostingList));
            }
            Ok(Box::new(Intersection {
                heads: vec![0; sources.len()],
                sources,
                primed: false,
                exhausted: false,
                global_max,
            }))
        }
    }
}

/// Pivot-driven intersection: the candidate is the largest current head;
/// every source behind it advances; a full match is emitted. On equal
/// heads any source may advance first, the result is the same.
pub struct Intersection {
    sources: Vec<BoxedPostingList>,
    heads: Vec<RowId>,
    primed: bool,
    exhausted: bool,
    global_max: RowId,
}

impl Intersection {
    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for i in 0..self.sources.len() {
            self.heads[i] = self.sources[i].next_posting()?;
        }
        Ok(())
    }

    /// Advance lagging sources until all heads agree or one exhausts.
    fn align(&mut self) -> Result<RowId> {
        loop {
            if self.heads.contains(&END_OF_STREAM) {
                self.exhausted = true;
                return Ok(END_OF_STREAM);
            }
            let candidate = self.heads.iter().copied().max().unwrap_or(END_OF_STREAM);
            let mut matched = true;
            for i in 0..self.sources.len() {
                if self.heads[i] < candidate {
                    self.heads[i] = self.sources[i].advance(candidate)?;
                    if self.heads[i] != candidate {
                        matched = false;
                        break;
                    }
                }
            }
            if matched {
                // Refill every head past the emitted id.
                for i in 0..self.sources.len() {
                    self.heads[i] = self.sources[i].next_posting()?;
                }
                return Ok(candidate);
            }
        }
    }
}

impl PostingList for Intersection {
    fn next_posting(&mut self) -> Result<RowId> {
        if self.exhausted {
            return Ok(END_OF_STREAM);
        }
        self.prime()?;
        self.align()
    }

    fn advance(&mut self, target: RowId) -> Result<RowId> {
        if self.exhausted {
            return Ok(END_OF_STREAM);
        }
        if target > self.global_max {
            self.exhausted = true;
            return Ok(END_OF_STREAM);
        }
        self.prime()?;
        for i in 0..self.sources.len() {
            if self.heads[i] < target {
                self.heads[i] = self.sources[i].advance(target)?;
            }
        }
        self.align()
    }

    fn size(&self) -> usize {
        // The intersection can be no larger than its smallest source.
        self.sources.iter().map(|s| s.size()).min().unwrap_or(0)
    }

    fn min_row_id(&self) -> RowId {
        self.sources.iter().map(|s| s.min_row_id()).max().unwrap_or(END_OF_STREAM)
    }

    fn max_row_id(&self) -> RowId {
        self.global_max
    }

    fn close(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.close()?;
        }
        Ok(())
    }
}
