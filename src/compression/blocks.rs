use crate::compression::vbyte::VByte;
use crate::core::error::{Error, ErrorKind, Result};

/// Frame-of-reference delta coding for one posting block. The block's
/// first row id is the reference (held by the blocks summary, not
/// repeated here); the body is the variable-byte gaps between
/// consecutive ids.
pub struct DeltaBlock;

impl DeltaBlock {
    /// Encode a strictly-increasing block. The first id is NOT written.
    pub fn encode(ids: &[u32], output: &mut Vec<u8>) {
        for pair in ids.windows(2) {
            debug_assert!(pair[1] > pair[0], "posting block must be strictly increasing");
            VByte::write_u32(output, pair[1] - pair[0]);
        }
    }

    /// Decode a block of `count` ids whose first id is `first`. Returns
    /// the ids and the number of bytes consumed.
    pub fn decode(data: &[u8], first: u32, count: usize) -> Result<(Vec<u32>, usize)> {
        let mut ids = Vec::with_capacity(count);
        ids.push(first);
        let mut pos = 0;
        let mut prev = first;
        for _ in 1..count {
            let (gap, consumed) = VByte::read_u32(&data[pos..])?;
            if gap == 0 {
                return Err(Error::new(ErrorKind::Corruption, "zero gap in posting block"));
            }
            prev = prev.checked_add(gap).ok_or_else(|| {
                Error::new(ErrorKind::Corruption, "posting block overflow")
            })?;
            ids.push(prev);
            pos += consumed;
        }
        Ok((ids, pos))
    }
}
