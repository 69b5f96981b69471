use std::collections::BTreeMap;

use fst::MapBuilder;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::RowId;
use crate::postings::writer::PostingsWriter;

/// Where one literal segment landed inside the shared component regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteralSegmentInfo {
    pub terms_offset: u64,
    pub terms_len: u64,
    pub postings_offset: u64,
    pub postings_len: u64,
    pub term_count: u64,
    pub min_term: Vec<u8>,
    pub max_term: Vec<u8>,
}

/// Serializes one segment's term dictionary and postings. The dictionary
/// is a byte-comparable trie whose leaf payload is the posting-list
/// offset, relative to the segment's postings region.
pub struct LiteralSegmentWriter {
    posting_block_size: usize,
}

impl LiteralSegmentWriter {
    pub fn new(posting_block_size: usize) -> Self {
        LiteralSegmentWriter { posting_block_size }
    }

    /// Append the segment to the shared terms and postings buffers. The
    /// input map is already term-sorted, which is what the trie builder
    /// requires.
    pub fn write(
        &self,
        terms: &BTreeMap<Vec<u8>, Vec<RowId>>,
        terms_out: &mut Vec<u8>,
        postings_out: &mut Vec<u8>,
    ) -> Result<LiteralSegmentInfo> {
        debug_assert!(!terms.is_empty(), "literal segment must hold at least one term");

        let terms_offset = terms_out.len() as u64;
        let postings_offset = postings_out.len() as u64;

        let postings_writer = PostingsWriter::new(self.posting_block_size);
        let mut segment_postings = Vec::new();
        let mut builder = MapBuilder::memory();
        for (term, row_ids) in terms {
            let offset = postings_writer.write(row_ids, &mut segment_postings)?;
            builder.insert(term, offset)?;
        }
        let trie_bytes = builder.into_inner()?;

        terms_out.extend_from_slice(&trie_bytes);
        postings_out.extend_from_slice(&segment_postings);

        let min_term = terms.keys().next().cloned().unwrap_or_default();
        let max_term = terms.keys().next_back().cloned().unwrap_or_default();
        Ok(LiteralSegmentInfo {
            terms_offset,
            terms_len: trie_bytes.len() as u64,
            postings_offset,
            postings_len: segment_postings.len() as u64,
            term_count: terms.len() as u64,
            min_term,
            max_term,
        })
    }
}
