use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::analysis::{literal_terms, TermTransform};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{CollectionAspect, ColumnValue, PrimaryKey};

/// Live literal index for one (column, memtable): a byte-comparable
/// sorted map from term to the keys holding it. Writes are acked
/// synchronously under the host memtable's locking.
pub struct MemtableLiteralIndex {
    transform: TermTransform,
    aspect: CollectionAspect,
    term_size_limit: usize,
    map: RwLock<BTreeMap<Vec<u8>, BTreeSet<PrimaryKey>>>,
    keys: RwLock<BTreeSet<PrimaryKey>>,
}

impl MemtableLiteralIndex {
    pub fn new(transform: TermTransform, aspect: CollectionAspect, term_size_limit: usize) -> Self {
        MemtableLiteralIndex {
            transform,
            aspect,
            term_size_limit,
            map: RwLock::new(BTreeMap::new()),
            keys: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn transform(&self) -> &TermTransform {
        &self.transform
    }

    /// Index one column value; the terms depend on the collection aspect.
    pub fn insert_value(&self, key: PrimaryKey, value: &ColumnValue) -> Result<()> {
        let terms = literal_terms(&self.transform, self.aspect, value)?;
        for term in &terms {
            self.check_size(term)?;
        }
        let mut map = self.map.write();
        for term in terms {
            map.entry(term).or_default().insert(key.clone());
        }
        drop(map);
        self.keys.write().insert(key);
        Ok(())
    }

    pub fn remove_value(&self, key: &PrimaryKey, value: &ColumnValue) -> Result<()> {
        let terms = literal_terms(&self.transform, self.aspect, value)?;
        for term in terms {
            self.remove_term(key, &term);
        }
        Ok(())
    }

    /// Index a pre-encoded term (booleans, UUIDs, collection elements).
    pub fn insert_term(&self, key: PrimaryKey, term: Vec<u8>) -> Result<()> {
        self.check_size(&term)?;
        self.map.write().entry(term).or_default().insert(key.clone());
        self.keys.write().insert(key);
        Ok(())
    }

    pub fn remove_term(&self, key: &PrimaryKey, term: &[u8]) {
        let mut map = self.map.write();
        if let Some(set) = map.get_mut(term) {
            set.remove(key);
            if set.is_empty() {
                map.remove(term);
            }
        }
        let remaining = map.values().any(|set| set.contains(key));
        if !remaining {
            self.keys.write().remove(key);
        }
    }

    fn check_size(&self, term: &[u8]) -> Result<()> {
        if term.len() > self.term_size_limit {
            return Err(Error::new(
                ErrorKind::TermTooLarge,
                format!("term of {} bytes exceeds limit {}", term.len(), self.term_size_limit),
            ));
        }
        Ok(())
    }

    pub fn exact(&self, term: &[u8]) -> BTreeSet<PrimaryKey> {
        self.map.read().get(term).cloned().unwrap_or_default()
    }

    pub fn range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        post_filter: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> BTreeSet<PrimaryKey> {
        let map = self.map.read();
        let mut out = BTreeSet::new();
        for (term, keys) in map.range::<[u8], _>((lower, upper)) {
            if let Some(filter) = post_filter {
                if !filter(term) {
                    continue;
                }
            }
            out.extend(keys.iter().cloned());
        }
        out
    }

    /// Every key with at least one live term; the complement base for the
    /// NOT family.
    pub fn all_keys(&self) -> BTreeSet<PrimaryKey> {
        self.keys.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Term-sorted snapshot seeding the segment writer at flush.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<PrimaryKey>> {
        self.map
            .read()
            .iter()
            .map(|(term, keys)| (term.clone(), keys.iter().cloned().collect()))
            .collect()
    }

    pub fn estimated_bytes(&self) -> usize {
        let map = self.map.read();
        map.iter().map(|(term, keys)| term.len() + keys.len() * 48 + 32).sum()
    }
}
