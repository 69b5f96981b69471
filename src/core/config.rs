use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::types::{IndexKind, SimilarityFunction};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Byte budget shared by all concurrent segment builds; exceeding it
    /// flushes the open segment.
    pub segment_buffer_limit: usize,
    pub max_points_in_leaf_node: usize,
    pub posting_block_size: usize,
    /// Candidate count at or below which filtered ANN scores exhaustively
    /// instead of walking the graph.
    pub max_brute_force_rows: usize,
    /// Minimum segment row count before a PQ codebook is trained.
    pub min_pq_rows: usize,
    pub build_parallelism: usize,
    /// How long a query waits on an in-flight initial build before failing
    /// with a typed not-queryable error.
    pub build_gate_timeout_ms: u64,
    pub max_node_connections: usize,
    pub construction_beam_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            segment_buffer_limit: 64 * 1024 * 1024,
            max_points_in_leaf_node: 1024,
            posting_block_size: 128,
            max_brute_force_rows: 1024,
            min_pq_rows: 1024,
            build_parallelism: 2,
            build_gate_timeout_ms: 10_000,
            max_node_connections: 16,
            construction_beam_width: 100,
        }
    }
}

/// Embedding source presets; each selects a default similarity function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceModel {
    Ada002,
    OpenAiV3Small,
    OpenAiV3Large,
    Gecko,
    Other,
}

impl SourceModel {
    fn parse(s: &str) -> Option<SourceModel> {
        match s {
            "ada002" => Some(SourceModel::Ada002),
            "openai-v3-small" => Some(SourceModel::OpenAiV3Small),
            "openai-v3-large" => Some(SourceModel::OpenAiV3Large),
            "gecko" => Some(SourceModel::Gecko),
            "other" => Some(SourceModel::Other),
            _ => None,
        }
    }

    pub fn default_similarity(&self) -> SimilarityFunction {
        match self {
            // ada002 and gecko embeddings are unit-length; dot product
            // preserves their angular semantics at lower cost.
            SourceModel::Ada002 | SourceModel::Gecko => SimilarityFunction::DotProduct,
            _ => SimilarityFunction::Cosine,
        }
    }
}

/// Validated per-index options, parsed from the raw string map given at
/// index creation.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub case_sensitive: bool,
    pub normalize: bool,
    pub ascii: bool,
    pub whitespace_analyzer: bool,
    pub similarity: SimilarityFunction,
    pub source_model: Option<SourceModel>,
    pub bkd_postings_skip: u32,
    pub bkd_postings_min_leaves: u32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            case_sensitive: true,
            normalize: false,
            ascii: false,
            whitespace_analyzer: false,
            similarity: SimilarityFunction::Cosine,
            source_model: None,
            bkd_postings_skip: 3,
            bkd_postings_min_leaves: 4,
        }
    }
}

impl IndexOptions {
    /// Parse and validate the raw option map for a column of the given
    /// kind. Misspelled keys, invalid value types and options applied to
    /// the wrong column kind are all rejected here, before any index state
    /// is created.
    pub fn parse(kind: IndexKind, raw: &HashMap<String, String>) -> Result<IndexOptions> {
        let mut options = IndexOptions::default();

        for (key, value) in raw {
            match key.as_str() {
                "case_sensitive" => {
                    require_kind(kind, IndexKind::Literal, key)?;
                    options.case_sensitive = parse_bool(key, value)?;
                }
                "normalize" => {
                    require_kind(kind, IndexKind::Literal, key)?;
                    options.normalize = parse_bool(key, value)?;
                }
                "ascii" => {
                    require_kind(kind, IndexKind::Literal, key)?;
                    options.ascii = parse_bool(key, value)?;
                }
                "index_analyzer" => {
                    require_kind(kind, IndexKind::Literal, key)?;
                    if value != "whitespace" {
                        return Err(Error::invalid_options(format!(
                            "unknown analyzer '{}'; only 'whitespace' is supported",
                            value
                        )));
                    }
                    options.whitespace_analyzer = true;
                }
                "similarity_function" => {
                    require_kind(kind, IndexKind::Vector, key)?;
                    options.similarity = match value.as_str() {
                        "cosine" => SimilarityFunction::Cosine,
                        "dot_product" => SimilarityFunction::DotProduct,
                        "euclidean" => SimilarityFunction::Euclidean,
                        other => {
                            return Err(Error::invalid_options(format!(
                                "unknown similarity function '{}'",
                                other
                            )))
                        }
                    };
                }
                "source_model" => {
                    require_kind(kind, IndexKind::Vector, key)?;
                    let model = SourceModel::parse(value).ok_or_else(|| {
                        Error::invalid_options(format!("unknown source model '{}'", value))
                    })?;
                    options.source_model = Some(model);
                    if !raw.contains_key("similarity_function") {
                        options.similarity = model.default_similarity();
                    }
                }
                "bkd_postings_skip" => {
                    require_kind(kind, IndexKind::Numeric, key)?;
                    options.bkd_postings_skip = parse_min_u32(key, value, 1)?;
                }
                "bkd_postings_min_leaves" => {
                    require_kind(kind, IndexKind::Numeric, key)?;
                    options.bkd_postings_min_leaves = parse_min_u32(key, value, 1)?;
                }
                _ => {
                    return Err(Error::invalid_options(format!("unknown option '{}'", key)));
                }
            }
        }

        Ok(options)
    }
}

fn require_kind(actual: IndexKind, expected: IndexKind, key: &str) -> Result<()> {
    if actual != expected {
        return Err(Error::invalid_options(format!(
            "option '{}' is not valid for a {:?} index",
            key, actual
        )));
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_options(format!(
            "option '{}' expects true or false, got '{}'",
            key, value
        ))),
    }
}

fn parse_min_u32(key: &str, value: &str, min: u32) -> Result<u32> {
    let parsed: u32 = value.parse().map_err(|_| {
        Error::invalid_options(format!("option '{}' expects an integer, got '{}'", key, value))
    })?;
    if parsed < min {
        return Err(Error::invalid_options(format!(
            "option '{}' must be >= {}",
            key, min
        )));
    }
    Ok(parsed)
}
