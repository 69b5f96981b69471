use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::fault::{points, FaultRegistry};
use crate::core::types::{PrimaryKey, RowId, Token};
use crate::storage::component::ComponentType;
use crate::storage::handle::FileSlice;
use crate::storage::layout::IndexDescriptor;

/// Writes the per-SSTable primary-key components: a byte-comparable trie
/// from encoded key to row id, serialized key blocks with a dense offset
/// array, the token array, and the partition-start row ids.
pub struct PrimaryKeyMapWriter;

impl PrimaryKeyMapWriter {
    /// `keys` must be sorted and unique; row id i maps to keys[i].
    pub fn write(
        descriptor: &IndexDescriptor,
        keys: &[PrimaryKey],
        faults: &FaultRegistry,
    ) -> Result<()> {
        for pair in keys.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "primary keys must arrive sorted and unique",
                ));
            }
        }

        let mut builder = MapBuilder::memory();
        for (row, key) in keys.iter().enumerate() {
            builder.insert(key.encoded(), row as u64)?;
        }
        descriptor.write_component(None, ComponentType::PrimaryKeyTrie, builder.into_inner()?)?;

        let mut blocks = Vec::new();
        let mut offsets = Vec::with_capacity((keys.len() + 1) * 8);
        for key in keys {
            offsets.extend_from_slice(&(blocks.len() as u64).to_le_bytes());
            let serialized = bincode::serialize(key)?;
            blocks.extend_from_slice(&serialized);
        }
        offsets.extend_from_slice(&(blocks.len() as u64).to_le_bytes());
        descriptor.write_component(None, ComponentType::PrimaryKeyBlocks, blocks)?;
        descriptor.write_component(None, ComponentType::PrimaryKeyBlockOffsets, offsets)?;

        faults.fire(points::BEFORE_TOKEN_WRITER_ADD)?;
        let mut tokens = Vec::with_capacity(keys.len() * 8);
        let mut partition_starts = Vec::new();
        let mut previous: Option<&PrimaryKey> = None;
        for (row, key) in keys.iter().enumerate() {
            tokens.extend_from_slice(&key.token.to_le_bytes());
            let new_partition = previous.map(|p| !p.same_partition(key)).unwrap_or(true);
            if new_partition {
                partition_starts.extend_from_slice(&(row as u32).to_le_bytes());
            }
            previous = Some(key);
        }
        descriptor.write_component(None, ComponentType::TokenValues, tokens)?;
        descriptor.write_component(None, ComponentType::OffsetsValues, partition_starts)?;
        Ok(())
    }
}

/// Bidirectional (primary key <-> dense row id) map for one SSTable,
/// shared by every column index of that SSTable.
pub struct PrimaryKeyMap {
    trie: Map<Vec<u8>>,
    blocks: FileSlice,
    offsets: Vec<u64>,
    tokens: Vec<Token>,
    partition_starts: Vec<RowId>,
}

impl PrimaryKeyMap {
    /// Open and validate the per-SSTable components. The caller has
    /// already checked the group completion marker.
    pub fn open(descriptor: &IndexDescriptor) -> Result<Self> {
        let (_, trie_slice) = descriptor.open_component(None, ComponentType::PrimaryKeyTrie)?;
        let trie = Map::new(trie_slice.bytes().to_vec())
            .map_err(|e| Error::corruption(format!("primary-key trie unreadable: {}", e)))?;

        let (_, blocks) = descriptor.open_component(None, ComponentType::PrimaryKeyBlocks)?;
        let (_, offsets_slice) =
            descriptor.open_component(None, ComponentType::PrimaryKeyBlockOffsets)?;
        let offsets: Vec<u64> = offsets_slice
            .bytes()
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        if offsets.len() != trie.len() + 1 {
            return Err(Error::corruption("primary-key offsets do not cover the trie"));
        }

        let (_, tokens_slice) = descriptor.open_component(None, ComponentType::TokenValues)?;
        let tokens: Vec<Token> = tokens_slice
            .bytes()
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        if tokens.len() + 1 != offsets.len() {
            return Err(Error::corruption("token array does not cover the key map"));
        }

        let (_, starts_slice) = descriptor.open_component(None, ComponentType::OffsetsValues)?;
        let partition_starts: Vec<RowId> = starts_slice
            .bytes()
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(PrimaryKeyMap { trie, blocks, offsets, tokens, partition_starts })
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, row: RowId) -> Option<Token> {
        self.tokens.get(row as usize).copied()
    }

    pub fn partition_count(&self) -> usize {
        self.partition_starts.len()
    }

    pub fn row_id_of(&self, key: &PrimaryKey) -> Option<RowId> {
        self.trie.get(key.encoded()).map(|row| row as RowId)
    }

    /// Smallest row id whose key is >= the given key.
    pub fn ceiling_row(&self, key: &PrimaryKey) -> Option<RowId> {
        let mut stream = self.trie.range().ge(key.encoded()).into_stream();
        stream.next().map(|(_, row)| row as RowId)
    }

    pub fn primary_key(&self, row: RowId) -> Result<PrimaryKey> {
        let row = row as usize;
        if row + 1 >= self.offsets.len() {
            return Err(Error::new(ErrorKind::NotFound, format!("row id {} out of range", row)));
        }
        let start = self.offsets[row] as usize;
        let end = self.offsets[row + 1] as usize;
        let key: PrimaryKey = bincode::deserialize(&self.blocks.bytes()[start..end])
            .map_err(|e| Error::corruption(format!("primary-key block unreadable: {}", e)))?;
        Ok(key)
    }
}
