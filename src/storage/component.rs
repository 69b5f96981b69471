use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::IndexKind;

/// On-disk format generation. Two-letter tokens appear in component file
/// names; the numeric code is stored in every footer. Newer readers open
/// older formats; writes always use `Version::CURRENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// Legacy generation: posting lists are whole serialized id arrays.
    Aa,
    /// Current generation: block-coded postings with skip summaries.
    Ca,
}

impl Version {
    pub const CURRENT: Version = Version::Ca;

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Aa => "AA",
            Version::Ca => "CA",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Version::Aa => 1,
            Version::Ca => 2,
        }
    }

    pub fn from_code(code: u16) -> Result<Version> {
        match code {
            1 => Ok(Version::Aa),
            2 => Ok(Version::Ca),
            other => Err(Error::new(
                ErrorKind::Corruption,
                format!("unknown format version code {}", other),
            )),
        }
    }
}

/// Every file the engine writes for one SSTable. Markers are empty files
/// whose presence signals completion; everything else carries a checksummed
/// footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    TermsData,
    TermsFooterPointer,
    PostingLists,
    KdTree,
    KdTreePostingLists,
    AnnGraph,
    AnnVectors,
    AnnPq,
    AnnOrdinals,
    Meta,
    ColumnCompletionMarker,
    PrimaryKeyTrie,
    PrimaryKeyBlocks,
    PrimaryKeyBlockOffsets,
    TokenValues,
    OffsetsValues,
    GroupCompletionMarker,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::TermsData => "TERMS_DATA",
            ComponentType::TermsFooterPointer => "TERMS_FOOTER_POINTER",
            ComponentType::PostingLists => "POSTING_LISTS",
            ComponentType::KdTree => "KD_TREE",
            ComponentType::KdTreePostingLists => "KD_TREE_POSTING_LISTS",
            ComponentType::AnnGraph => "ANN_GRAPH",
            ComponentType::AnnVectors => "ANN_VECTORS",
            ComponentType::AnnPq => "ANN_PQ",
            ComponentType::AnnOrdinals => "ANN_ORDINALS",
            ComponentType::Meta => "META",
            ComponentType::ColumnCompletionMarker => "COLUMN_COMPLETION_MARKER",
            ComponentType::PrimaryKeyTrie => "PRIMARY_KEY_TRIE",
            ComponentType::PrimaryKeyBlocks => "PRIMARY_KEY_BLOCKS",
            ComponentType::PrimaryKeyBlockOffsets => "PRIMARY_KEY_BLOCK_OFFSETS",
            ComponentType::TokenValues => "TOKEN_VALUES",
            ComponentType::OffsetsValues => "OFFSETS_VALUES",
            ComponentType::GroupCompletionMarker => "GROUP_COMPLETION_MARKER",
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            ComponentType::ColumnCompletionMarker | ComponentType::GroupCompletionMarker
        )
    }

    pub fn is_per_sstable(&self) -> bool {
        matches!(
            self,
            ComponentType::PrimaryKeyTrie
                | ComponentType::PrimaryKeyBlocks
                | ComponentType::PrimaryKeyBlockOffsets
                | ComponentType::TokenValues
                | ComponentType::OffsetsValues
                | ComponentType::GroupCompletionMarker
        )
    }

    /// Data components a finished per-column index of the given kind must
    /// have on disk (completion marker excluded).
    pub fn per_column_data(kind: IndexKind) -> &'static [ComponentType] {
        match kind {
            IndexKind::Literal => &[
                ComponentType::TermsData,
                ComponentType::TermsFooterPointer,
                ComponentType::PostingLists,
                ComponentType::Meta,
            ],
            IndexKind::Numeric => &[
                ComponentType::KdTree,
                ComponentType::KdTreePostingLists,
                ComponentType::Meta,
            ],
            IndexKind::Vector => &[
                ComponentType::AnnGraph,
                ComponentType::AnnVectors,
                ComponentType::AnnPq,
                ComponentType::AnnOrdinals,
                ComponentType::Meta,
            ],
        }
    }

    /// Per-SSTable data components (group marker excluded).
    pub fn per_sstable_data() -> &'static [ComponentType] {
        &[
            ComponentType::PrimaryKeyTrie,
            ComponentType::PrimaryKeyBlocks,
            ComponentType::PrimaryKeyBlockOffsets,
            ComponentType::TokenValues,
            ComponentType::OffsetsValues,
        ]
    }
}
