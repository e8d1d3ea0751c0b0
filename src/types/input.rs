//! Normalized input sets.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::value::CellValue;

/// Normalized, coerced inputs for one request.
///
/// Keys are lowercased input names. The map is ordered, so the JSON form and
/// therefore [`InputSet::digest`] are independent of the caller's key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSet {
    values: BTreeMap<String, CellValue>,
}

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; the key is lowercased.
    pub fn insert(&mut self, name: &str, value: CellValue) {
        self.values.insert(name.to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.values.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CellValue)> {
        self.values.iter()
    }

    /// Stable hex SHA-256 digest over the sorted-key JSON form.
    ///
    /// Stable across processes, so it can key a distributed cache.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(&self.values).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}

impl FromIterator<(String, CellValue)> for InputSet {
    fn from_iter<I: IntoIterator<Item = (String, CellValue)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(&k, v);
        }
        set
    }
}
