use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::compression::blocks::DeltaBlock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{RowId, END_OF_STREAM};
use crate::postings::{PostingList, VecPostingList};
use crate::storage::handle::FileSlice;

/// Decoded posting blocks shared across readers of one postings region,
/// keyed by (list offset, block index).
pub type BlockCache = Arc<Mutex<LruCache<(u64, u32), Arc<Vec<u32>>>>>;

pub fn new_block_cache(capacity: usize) -> BlockCache {
    let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
    Arc::new(Mutex::new(LruCache::new(capacity)))
}

/// Reader over one block-coded posting list (see `PostingsWriter` for the
/// layout). Owns its decoder state; shares the mapped file.
pub struct PostingsReader {
    data: FileSlice,
    list_offset: u64,
    count: usize,
    last_id: RowId,
    block_size: usize,
    block_first: Vec<u32>,
    block_rel: Vec<u32>,
    blocks_base: usize,
    loaded: Option<(usize, Arc<Vec<u32>>)>,
    next_index: usize,
    cache: Option<BlockCache>,
}

impl PostingsReader {
    pub fn open(data: FileSlice, list_offset: u64, cache: Option<BlockCache>) -> Result<Self> {
        let bytes = data.bytes();
        let mut pos = list_offset as usize;

        let count = read_u32(bytes, &mut pos)? as usize;
        let last_id = read_u32(bytes, &mut pos)?;
        let block_size = read_u32(bytes, &mut pos)? as usize;
        let num_blocks = read_u32(bytes, &mut pos)? as usize;
        if count == 0 || block_size < 2 || num_blocks != (count + block_size - 1) / block_size {
            return Err(Error::corruption("inconsistent posting list header"));
        }

        let mut block_first = Vec::with_capacity(num_blocks);
        let mut block_rel = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            block_first.push(read_u32(bytes, &mut pos)?);
            block_rel.push(read_u32(bytes, &mut pos)?);
        }

        Ok(PostingsReader {
            data,
            list_offset,
            count,
            last_id,
            block_size,
            block_first,
            block_rel,
            blocks_base: pos,
            loaded: None,
            next_index: 0,
            cache,
        })
    }

    fn block_len(&self, block: usize) -> usize {
        (self.count - block * self.block_size).min(self.block_size)
    }

    fn load_block(&mut self, block: usize) -> Result<Arc<Vec<u32>>> {
        if let Some((loaded, ids)) = &self.loaded {
            if *loaded == block {
                return Ok(Arc::clone(ids));
            }
        }

        let key = (self.list_offset, block as u32);
        if let Some(cache) = &self.cache {
            if let Some(ids) = cache.lock().get(&key) {
                let ids = Arc::clone(ids);
                self.loaded = Some((block, Arc::clone(&ids)));
                return Ok(ids);
            }
        }

        let start = self.blocks_base + self.block_rel[block] as usize;
        let bytes = self.data.bytes();
        if start > bytes.len() {
            return Err(Error::corruption("posting block offset out of bounds"));
        }
        let (ids, _) =
            DeltaBlock::decode(&bytes[start..], self.block_first[block], self.block_len(block))?;
        let ids = Arc::new(ids);
        if let Some(cache) = &self.cache {
            cache.lock().put(key, Arc::clone(&ids));
        }
        self.loaded = Some((block, Arc::clone(&ids)));
        Ok(ids)
    }

    fn posting_at(&mut self, index: usize) -> Result<RowId> {
        let block = index / self.block_size;
        let ids = self.load_block(block)?;
        Ok(ids[index % self.block_size])
    }
}

impl PostingList for PostingsReader {
    fn next_posting(&mut self) -> Result<RowId> {
        if self.next_index >= self.count {
            return Ok(END_OF_STREAM);
        }
        let id = self.posting_at(self.next_index)?;
        self.next_index += 1;
        Ok(id)
    }

    fn advance(&mut self, target: RowId) -> Result<RowId> {
        if self.next_index >= self.count {
            return Ok(END_OF_STREAM);
        }
        if target > self.last_id {
            self.next_index = self.count;
            return Ok(END_OF_STREAM);
        }

        // Last block whose first id is <= target; never behind the cursor.
        let candidate_block = self.block_first.partition_point(|&first| first <= target);
        let block = candidate_block.saturating_sub(1).max(self.next_index / self.block_size);

        let ids = self.load_block(block)?;
        let base = block * self.block_size;
        let within = ids.partition_point(|&id| id < target);
        // When the whole block is behind the target this lands on the
        // first id of the following block, which is > target by choice
        // of block above.
        let index = (base + within).max(self.next_index);
        if index >= self.count {
            self.next_index = self.count;
            return Ok(END_OF_STREAM);
        }
        let id = self.posting_at(index)?;
        self.next_index = index + 1;
        Ok(id)
    }

    fn size(&self) -> usize {
        self.count
    }

    fn min_row_id(&self) -> RowId {
        self.block_first.first().copied().unwrap_or(END_OF_STREAM)
    }

    fn max_row_id(&self) -> RowId {
        self.last_id
    }

    fn close(&mut self) -> Result<()> {
        self.loaded = None;
        Ok(())
    }
}

/// Legacy (`AA`) posting lists are whole bincode-serialized id arrays.
pub fn read_legacy_list(bytes: &[u8]) -> Result<VecPostingList> {
    let ids: Vec<u32> = bincode::deserialize(bytes)
        .map_err(|e| Error::corruption(format!("legacy posting list unreadable: {}", e)))?;
    if !ids.windows(2).all(|w| w[0] < w[1]) {
        return Err(Error::new(ErrorKind::Corruption, "legacy posting list not sorted"));
    }
    Ok(VecPostingList::new(ids))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > bytes.len() {
        return Err(Error::corruption("posting list truncated"));
    }
    let value = u32::from_le_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]);
    *pos += 4;
    Ok(value)
}
