use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::core::error::Result;
use crate::core::types::{RowId, END_OF_STREAM};
use crate::postings::{BoxedPostingList, EmptyPostingList, PostingList};

/// Build the union of the given sources. Zero sources collapse to empty
/// and a single source is returned as-is, unwrapped.
pub fn union(mut sources: Vec<BoxedPostingList>) -> BoxedPostingList {
    sources.retain(|s| s.size() > 0);
    match sources.len() {
        0 => Box::new(EmptyPostingList),
        1 => sources.pop().unwrap(),
        _ => Box::new(KWayUnion::new(sources)),
    }
}

/// Merge of per-term posting lists within one index: same operation, the
/// per-source sequences are already strictly increasing.
pub fn merge(sources: Vec<BoxedPostingList>) -> BoxedPostingList {
    union(sources)
}

/// K-way union over a min-heap keyed by each source's current head.
pub struct KWayUnion {
    sources: Vec<BoxedPostingList>,
    heap: BinaryHeap<Reverse<(RowId, usize)>>,
    primed: bool,
    exhausted: bool,
    min: RowId,
    max: RowId,
    size: usize,
}

impl KWayUnion {
    fn new(sources: Vec<BoxedPostingList>) -> Self {
        let min = sources.iter().map(|s| s.min_row_id()).min().unwrap_or(END_OF_STREAM);
        let max = sources.iter().map(|s| s.max_row_id()).max().unwrap_or(0);
        let size = sources.iter().map(|s| s.size()).sum();
        KWayUnion {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
            exhausted: false,
            min,
            max,
            size,
        }
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for i in 0..self.sources.len() {
            let head = self.sources[i].next_posting()?;
            if head != END_OF_STREAM {
                self.heap.push(Reverse((head, i)));
            }
        }
        Ok(())
    }

    fn refill(&mut self, source: usize) -> Result<()> {
        let head = self.sources[source].next_posting()?;
        if head != END_OF_STREAM {
            self.heap.push(Reverse((head, source)));
        }
        Ok(())
    }
}

impl PostingList for KWayUnion {
    fn next_posting(&mut self) -> Result<RowId> {
        if self.exhausted {
            return Ok(END_OF_STREAM);
        }
        self.prime()?;

        let (id, source) = match self.heap.pop() {
            Some(Reverse(entry)) => entry,
            None => {
                self.exhausted = true;
                return Ok(END_OF_STREAM);
            }
        };
        self.refill(source)?;

        // Swallow the same id surfacing from other sources.
        while let Some(&Reverse((head, other))) = self.heap.peek() {
            if head != id {
                break;
            }
            self.heap.pop();
            self.refill(other)?;
        }

        Ok(id)
    }

    fn advance(&mut self, target: RowId) -> Result<RowId> {
        if self.exhausted {
            return Ok(END_OF_STREAM);
        }
        if target > self.max {
            self.exhausted = true;
            self.heap.clear();
            return Ok(END_OF_STREAM);
        }
        self.prime()?;

        // Forward the advance to every source whose head is behind.
        let behind: Vec<(RowId, usize)> = self
            .heap
            .iter()
            .map(|&Reverse(entry)| entry)
            .collect();
        self.heap.clear();
        for (head, source) in behind {
            if head >= target {
                self.heap.push(Reverse((head, source)));
            } else {
                let advanced = self.sources[source].advance(target)?;
                if advanced != END_OF_STREAM {
                    self.heap.push(Reverse((advanced, source)));
                }
            }
        }

        self.next_posting()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn min_row_id(&self) -> RowId {
        self.min
    }

    fn max_row_id(&self) -> RowId {
        self.max
    }

    fn close(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.close()?;
        }
        self.heap.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{collect, VecPostingList};

    fn boxed(ids: Vec<RowId>) -> BoxedPostingList {
        Box::new(VecPostingList::new(ids))
    }

    #[test]
    fn union_merges_and_dedups_across_sources() {
        let mut u = union(vec![
            boxed(vec![1, 4, 6]),
            boxed(vec![2, 4, 9]),
            boxed(vec![4, 10]),
        ]);
        assert_eq!(collect(u.as_mut()).unwrap(), vec![1, 2, 4, 6, 9, 10]);
    }

    #[test]
    fn union_advance_forwards_to_sources() {
        let mut u = union(vec![boxed(vec![1, 5, 9]), boxed(vec![2, 6, 10])]);
        assert_eq!(u.advance(4).unwrap(), 5);
        assert_eq!(u.next_posting().unwrap(), 6);
        assert_eq!(u.advance(10).unwrap(), 10);
        assert_eq!(u.next_posting().unwrap(), END_OF_STREAM);
    }

    #[test]
    fn union_advance_past_max_short_circuits() {
        let mut u = union(vec![boxed(vec![1, 2]), boxed(vec![3])]);
        assert_eq!(u.advance(100).unwrap(), END_OF_STREAM);
    }

    #[test]
    fn single_source_is_unwrapped() {
        let mut u = union(vec![boxed(vec![7, 8])]);
        assert_eq!(collect(u.as_mut()).unwrap(), vec![7, 8]);
    }

    #[test]
    fn union_of_empties_is_empty() {
        let mut u = union(vec![
            Box::new(EmptyPostingList) as BoxedPostingList,
            Box::new(EmptyPostingList),
        ]);
        assert_eq!(u.next_posting().unwrap(), END_OF_STREAM);
    }
}
