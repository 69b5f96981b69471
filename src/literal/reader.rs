use std::ops::Bound;

use fst::{IntoStreamer, Map, Streamer};

use crate::core::context::QueryContext;
use crate::core::error::{Error, Result};
use crate::postings::reader::{read_legacy_list, BlockCache, PostingsReader};
use crate::postings::union::merge;
use crate::postings::{BoxedPostingList, EmptyPostingList};
use crate::storage::component::Version;
use crate::storage::handle::FileSlice;

/// Term-ordered scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// Reads one literal segment: trie lookups resolve posting-list offsets
/// in the segment's postings region. The format generation was decided
/// once at segment open; every posting read below dispatches on it
/// without re-inspecting files.
pub struct TermsReader {
    trie: Map<Vec<u8>>,
    postings: FileSlice,
    version: Version,
    cache: Option<BlockCache>,
}

impl TermsReader {
    pub fn open(
        terms: FileSlice,
        postings: FileSlice,
        version: Version,
        cache: Option<BlockCache>,
    ) -> Result<Self> {
        let trie = Map::new(terms.bytes().to_vec())
            .map_err(|e| Error::corruption(format!("terms trie unreadable: {}", e)))?;
        Ok(TermsReader { trie, postings, version, cache })
    }

    pub fn term_count(&self) -> usize {
        self.trie.len()
    }

    fn open_postings(&self, offset: u64) -> Result<BoxedPostingList> {
        match self.version {
            Version::Ca => Ok(Box::new(PostingsReader::open(
                self.postings.clone(),
                offset,
                self.cache.clone(),
            )?)),
            Version::Aa => {
                // Legacy lists: [len: u32][bincode ids].
                let bytes = self.postings.bytes();
                let at = offset as usize;
                if at + 4 > bytes.len() {
                    return Err(Error::corruption("legacy posting list truncated"));
                }
                let len = u32::from_le_bytes([
                    bytes[at],
                    bytes[at + 1],
                    bytes[at + 2],
                    bytes[at + 3],
                ]) as usize;
                if at + 4 + len > bytes.len() {
                    return Err(Error::corruption("legacy posting list truncated"));
                }
                Ok(Box::new(read_legacy_list(&bytes[at + 4..at + 4 + len])?))
            }
        }
    }

    /// Trie lookup; a miss is the empty list.
    pub fn exact_match(&self, term: &[u8], ctx: &QueryContext) -> Result<BoxedPostingList> {
        if !ctx.checkpoint()? {
            return Ok(Box::new(EmptyPostingList));
        }
        match self.trie.get(term) {
            Some(offset) => self.open_postings(offset),
            None => Ok(Box::new(EmptyPostingList)),
        }
    }

    /// Range cursor over the trie; matching posting lists are merged.
    /// `post_filter` keeps only terms satisfying a predicate the trie
    /// cannot express natively (decoded-term comparisons).
    pub fn range_match(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        post_filter: Option<&dyn Fn(&[u8]) -> bool>,
        ctx: &QueryContext,
    ) -> Result<BoxedPostingList> {
        let mut range = self.trie.range();
        match lower {
            Bound::Included(bound) => range = range.ge(bound),
            Bound::Excluded(bound) => range = range.gt(bound),
            Bound::Unbounded => {}
        }
        match upper {
            Bound::Included(bound) => range = range.le(bound),
            Bound::Excluded(bound) => range = range.lt(bound),
            Bound::Unbounded => {}
        }

        let mut sources: Vec<BoxedPostingList> = Vec::new();
        let mut stream = range.into_stream();
        while let Some((term, offset)) = stream.next() {
            if !ctx.checkpoint()? {
                return Ok(Box::new(EmptyPostingList));
            }
            if let Some(filter) = post_filter {
                if !filter(term) {
                    continue;
                }
            }
            sources.push(self.open_postings(offset)?);
        }
        Ok(merge(sources))
    }

    /// Every (term, posting offset) pair, in the requested order. Used by
    /// segment merging at compaction.
    pub fn all_terms(&self, direction: ScanDirection) -> Result<Vec<(Vec<u8>, u64)>> {
        let mut terms = Vec::with_capacity(self.trie.len());
        let mut stream = self.trie.stream();
        while let Some((term, offset)) = stream.next() {
            terms.push((term.to_vec(), offset));
        }
        if direction == ScanDirection::Reverse {
            terms.reverse();
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RowId;
    use crate::literal::writer::LiteralSegmentWriter;
    use crate::postings::collect;
    use crate::storage::handle::MmapFile;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn build_segment(
        terms: &[(&[u8], Vec<RowId>)],
    ) -> (tempfile::TempDir, TermsReader) {
        let mut map = BTreeMap::new();
        for (term, ids) in terms {
            map.insert(term.to_vec(), ids.clone());
        }
        let writer = LiteralSegmentWriter::new(16);
        let mut terms_out = Vec::new();
        let mut postings_out = Vec::new();
        writer.write(&map, &mut terms_out, &mut postings_out).unwrap();

        let dir = tempfile::tempdir().unwrap();
        for (name, bytes) in [("terms", &terms_out), ("postings", &postings_out)] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(bytes).unwrap();
            f.sync_all().unwrap();
        }
        let terms_file = MmapFile::open_read_only(dir.path().join("terms")).unwrap();
        let terms_len = terms_file.len();
        let postings_file = MmapFile::open_read_only(dir.path().join("postings")).unwrap();
        let postings_len = postings_file.len();
        let reader = TermsReader::open(
            FileSlice::new(terms_file, 0, terms_len).unwrap(),
            FileSlice::new(postings_file, 0, postings_len).unwrap(),
            Version::Ca,
            None,
        )
        .unwrap();
        (dir, reader)
    }

    #[test]
    fn exact_match_hits_and_misses() {
        let (_dir, reader) = build_segment(&[
            (b"apple", vec![1, 5]),
            (b"banana", vec![2]),
        ]);
        let ctx = QueryContext::unbounded();
        let mut hit = reader.exact_match(b"apple", &ctx).unwrap();
        assert_eq!(collect(hit.as_mut()).unwrap(), vec![1, 5]);
        let mut miss = reader.exact_match(b"cherry", &ctx).unwrap();
        assert_eq!(collect(miss.as_mut()).unwrap(), Vec::<RowId>::new());
    }

    #[test]
    fn range_match_merges_matching_terms() {
        let (_dir, reader) = build_segment(&[
            (b"aa", vec![1]),
            (b"ab", vec![2, 3]),
            (b"ac", vec![3, 9]),
            (b"b", vec![4]),
        ]);
        let ctx = QueryContext::unbounded();
        let mut result = reader
            .range_match(Bound::Included(&b"ab"[..]), Bound::Excluded(&b"b"[..]), None, &ctx)
            .unwrap();
        assert_eq!(collect(result.as_mut()).unwrap(), vec![2, 3, 9]);
    }

    #[test]
    fn range_match_applies_post_filter() {
        let (_dir, reader) = build_segment(&[
            (b"aa", vec![1]),
            (b"ab", vec![2]),
            (b"ac", vec![3]),
        ]);
        let ctx = QueryContext::unbounded();
        let keep = |term: &[u8]| term != b"ab";
        let mut result = reader
            .range_match(Bound::Unbounded, Bound::Unbounded, Some(&keep), &ctx)
            .unwrap();
        assert_eq!(collect(result.as_mut()).unwrap(), vec![1, 3]);
    }

    #[test]
    fn scans_run_both_directions() {
        let (_dir, reader) = build_segment(&[
            (b"x", vec![1]),
            (b"y", vec![2]),
            (b"z", vec![3]),
        ]);
        let forward: Vec<Vec<u8>> = reader
            .all_terms(ScanDirection::Forward)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(forward, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
        let reverse: Vec<Vec<u8>> = reader
            .all_terms(ScanDirection::Reverse)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(reverse, vec![b"z".to_vec(), b"y".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn legacy_generation_lists_are_readable() {
        // AA segments serialized whole id arrays behind a length prefix;
        // the dispatch decided at open keeps them readable.
        let mut postings_out = Vec::new();
        let ids: Vec<RowId> = vec![3, 8, 21];
        let serialized = bincode::serialize(&ids).unwrap();
        let offset = postings_out.len() as u64;
        postings_out.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
        postings_out.extend_from_slice(&serialized);

        let mut builder = fst::MapBuilder::memory();
        builder.insert(b"legacy", offset).unwrap();
        let terms_out = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        for (name, bytes) in [("terms", &terms_out), ("postings", &postings_out)] {
            std::fs::write(dir.path().join(name), bytes).unwrap();
        }
        let terms_file = MmapFile::open_read_only(dir.path().join("terms")).unwrap();
        let terms_len = terms_file.len();
        let postings_file = MmapFile::open_read_only(dir.path().join("postings")).unwrap();
        let postings_len = postings_file.len();
        let reader = TermsReader::open(
            FileSlice::new(terms_file, 0, terms_len).unwrap(),
            FileSlice::new(postings_file, 0, postings_len).unwrap(),
            Version::Aa,
            None,
        )
        .unwrap();

        let ctx = QueryContext::unbounded();
        let mut hit = reader.exact_match(b"legacy", &ctx).unwrap();
        assert_eq!(collect(hit.as_mut()).unwrap(), ids);
    }

    #[test]
    fn cancelled_query_yields_empty() {
        let (_dir, reader) = build_segment(&[(b"apple", vec![1])]);
        let ctx = QueryContext::unbounded();
        ctx.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);
        let mut result = reader.exact_match(b"apple", &ctx).unwrap();
        assert_eq!(collect(result.as_mut()).unwrap(), Vec::<RowId>::new());
    }
}
