//! Literal term transforms. The pipeline mirrors the index options:
//! lowercase (`case_sensitive=false`), NFC (`normalize=true`), ASCII fold
//! (`ascii=true`), then optional whitespace tokenization. Every emitted
//! term shares the source row's id.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::core::config::IndexOptions;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{CollectionAspect, ColumnValue, MAX_ANALYZED_BYTES_PER_ROW};
use crate::encoding;

#[derive(Debug, Clone)]
pub struct TermTransform {
    lowercase: bool,
    nfc: bool,
    ascii_fold: bool,
    tokenize: bool,
}

impl TermTransform {
    pub fn from_options(options: &IndexOptions) -> Self {
        TermTransform {
            lowercase: !options.case_sensitive,
            nfc: options.normalize,
            ascii_fold: options.ascii,
            tokenize: options.whitespace_analyzer,
        }
    }

    /// True when the raw column bytes pass through untouched.
    pub fn is_identity(&self) -> bool {
        !self.lowercase && !self.nfc && !self.ascii_fold && !self.tokenize
    }

    /// Transform one column value into the terms to index. Enforces the
    /// cumulative analyzed-size limit per row.
    pub fn terms(&self, text: &str) -> Result<Vec<Vec<u8>>> {
        let mut value = text.to_string();
        if self.nfc {
            value = value.nfc().collect();
        }
        if self.ascii_fold {
            value = value.nfd().filter(|c| !is_combining_mark(*c)).collect();
        }
        if self.lowercase {
            value = value.to_lowercase();
        }

        let terms: Vec<Vec<u8>> = if self.tokenize {
            value.split_whitespace().map(|t| t.as_bytes().to_vec()).collect()
        } else {
            vec![value.into_bytes()]
        };

        let total: usize = terms.iter().map(|t| t.len()).sum();
        if total > MAX_ANALYZED_BYTES_PER_ROW {
            return Err(Error::new(
                ErrorKind::TermTooLarge,
                format!(
                    "analyzed terms total {} bytes, limit is {}",
                    total, MAX_ANALYZED_BYTES_PER_ROW
                ),
            ));
        }
        Ok(terms)
    }

    /// Transform a query-side term with the same pipeline, so lookups meet
    /// the indexed form. Tokenization is not applied to query terms.
    pub fn query_term(&self, text: &str) -> Vec<u8> {
        let mut value = text.to_string();
        if self.nfc {
            value = value.nfc().collect();
        }
        if self.ascii_fold {
            value = value.nfd().filter(|c| !is_combining_mark(*c)).collect();
        }
        if self.lowercase {
            value = value.to_lowercase();
        }
        value.into_bytes()
    }
}

/// The terms one literal column value contributes, per the index's
/// collection aspect.
pub fn literal_terms(
    transform: &TermTransform,
    aspect: CollectionAspect,
    value: &ColumnValue,
) -> Result<Vec<Vec<u8>>> {
    match value {
        ColumnValue::Null => Ok(Vec::new()),
        ColumnValue::Text(text) => transform.terms(text),
        ColumnValue::Term(term) => Ok(vec![term.clone()]),
        ColumnValue::Collection(terms) => Ok(terms.clone()),
        ColumnValue::Map(entries) => match aspect {
            CollectionAspect::Keys => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            CollectionAspect::Values => Ok(entries.iter().map(|(_, v)| v.clone()).collect()),
            CollectionAspect::Entries => {
                Ok(entries.iter().map(|(k, v)| encoding::entry_term(k, v)).collect())
            }
            CollectionAspect::Full => Err(Error::new(
                ErrorKind::InvalidArgument,
                "map value against a non-collection literal index",
            )),
        },
        ColumnValue::Vector(_) => Err(Error::new(
            ErrorKind::InvalidArgument,
            "vector value against a literal index",
        )),
    }
}
