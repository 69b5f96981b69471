use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::PrimaryKey;

/// Live numeric index for one (column, memtable): a sorted multimap over
/// fixed-width byte-comparable values.
pub struct MemtableNumericIndex {
    value_width: RwLock<Option<usize>>,
    map: RwLock<BTreeMap<Vec<u8>, BTreeSet<PrimaryKey>>>,
    keys: RwLock<BTreeSet<PrimaryKey>>,
}

impl MemtableNumericIndex {
    pub fn new() -> Self {
        MemtableNumericIndex {
            value_width: RwLock::new(None),
            map: RwLock::new(BTreeMap::new()),
            keys: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn value_width(&self) -> Option<usize> {
        *self.value_width.read()
    }

    fn check_width(&self, value: &[u8]) -> Result<()> {
        let mut width = self.value_width.write();
        match *width {
            Some(expected) if expected != value.len() => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("value width {} != {}", value.len(), expected),
            )),
            Some(_) => Ok(()),
            None => {
                if !crate::encoding::NUMERIC_WIDTHS.contains(&value.len()) {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("unsupported numeric width {}", value.len()),
                    ));
                }
                *width = Some(value.len());
                Ok(())
            }
        }
    }

    pub fn insert(&self, key: PrimaryKey, value: Vec<u8>) -> Result<()> {
        self.check_width(&value)?;
        self.map.write().entry(value).or_default().insert(key.clone());
        self.keys.write().insert(key);
        Ok(())
    }

    pub fn remove(&self, key: &PrimaryKey, value: &[u8]) {
        let mut map = self.map.write();
        if let Some(set) = map.get_mut(value) {
            set.remove(key);
            if set.is_empty() {
                map.remove(value);
            }
        }
        let remaining = map.values().any(|set| set.contains(key));
        if !remaining {
            self.keys.write().remove(key);
        }
    }

    pub fn exact(&self, value: &[u8]) -> BTreeSet<PrimaryKey> {
        self.map.read().get(value).cloned().unwrap_or_default()
    }

    pub fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> BTreeSet<PrimaryKey> {
        let map = self.map.read();
        let mut out = BTreeSet::new();
        for (_, keys) in map.range::<[u8], _>((lower, upper)) {
            out.extend(keys.iter().cloned());
        }
        out
    }

    pub fn all_keys(&self) -> BTreeSet<PrimaryKey> {
        self.keys.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Value-sorted snapshot seeding the segment writer at flush.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<PrimaryKey>)> {
        self.map
            .read()
            .iter()
            .map(|(value, keys)| (value.clone(), keys.iter().cloned().collect()))
            .collect()
    }

    pub fn estimated_bytes(&self) -> usize {
        let map = self.map.read();
        map.iter().map(|(value, keys)| value.len() + keys.len() * 48 + 32).sum()
    }
}

impl Default for MemtableNumericIndex {
    fn default() -> Self {
        MemtableNumericIndex::new()
    }
}
