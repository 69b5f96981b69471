use crate::compression::blocks::DeltaBlock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{RowId, END_OF_STREAM};

/// Writes block-coded posting lists into a postings region.
///
/// Per-list layout at the returned offset:
/// ```text
/// [count: u32][last_id: u32][block_size: u32][num_blocks: u32]
/// [num_blocks × (first_id: u32, rel_offset: u32)]   // blocks summary
/// [block bytes...]                                  // delta-coded gaps
/// ```
/// All integers little-endian; `rel_offset` is relative to the start of
/// the block-bytes area.
pub struct PostingsWriter {
    block_size: usize,
}

impl PostingsWriter {
    pub fn new(block_size: usize) -> Self {
        debug_assert!(block_size >= 2);
        PostingsWriter { block_size }
    }

    /// Append one list; returns its offset within `out`.
    pub fn write(&self, ids: &[RowId], out: &mut Vec<u8>) -> Result<u64> {
        if ids.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "empty posting list"));
        }
        for pair in ids.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "posting list not strictly increasing",
                ));
            }
        }
        if *ids.last().unwrap() >= END_OF_STREAM {
            return Err(Error::new(ErrorKind::InvalidArgument, "row id overflows stream sentinel"));
        }

        let offset = out.len() as u64;
        let num_blocks = (ids.len() + self.block_size - 1) / self.block_size;

        out.extend_from_slice(&(ids.len() as u32).to_le_bytes());
        out.extend_from_slice(&ids.last().unwrap().to_le_bytes());
        out.extend_from_slice(&(self.block_size as u32).to_le_bytes());
        out.extend_from_slice(&(num_blocks as u32).to_le_bytes());

        let mut block_bytes = Vec::new();
        let mut summary = Vec::with_capacity(num_blocks);
        for block in ids.chunks(self.block_size) {
            summary.push((block[0], block_bytes.len() as u32));
            DeltaBlock::encode(block, &mut block_bytes);
        }
        for (first_id, rel_offset) in summary {
            out.extend_from_slice(&first_id.to_le_bytes());
            out.extend_from_slice(&rel_offset.to_le_bytes());
        }
        out.extend_from_slice(&block_bytes);

        Ok(offset)
    }
}
