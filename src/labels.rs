//! Label vocabulary reconciliation.
//!
//! Indices of labels already known to the base model never move; labels seen
//! for the first time are appended in first-seen order.

use anyhow::{bail, Context, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Bijection between gesture label and contiguous class index `0..len`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelMap {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label_at(&self, index: usize) -> Option<&str> {
        self.order.get(index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    /// Labels in index order.
    pub fn labels(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.order.iter().enumerate().map(|(i, l)| (l.as_str(), i))
    }

    fn push(&mut self, label: &str) -> bool {
        if self.index.contains_key(label) {
            return false;
        }
        self.index.insert(label.to_string(), self.order.len());
        self.order.push(label.to_string());
        true
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading label map: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing label map: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)
            .with_context(|| format!("writing label map: {}", path.display()))
    }

    fn from_pairs(mut pairs: Vec<(String, usize)>) -> Result<Self> {
        pairs.sort_by_key(|(_, i)| *i);
        let mut map = LabelMap::default();
        for (expected, (label, idx)) in pairs.iter().enumerate() {
            if *idx != expected {
                bail!("label map indices are not contiguous from 0: '{label}' has {idx}, expected {expected}");
            }
            if !map.push(label) {
                bail!("label '{label}' appears twice");
            }
        }
        Ok(map)
    }
}

impl FromIterator<String> for LabelMap {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let mut map = LabelMap::default();
        for label in iter {
            map.push(&label);
        }
        map
    }
}

/// Assigns `0..k` to `base_labels` in their order, then the next free index to
/// each incoming label the base does not know. Duplicates inside either input
/// keep their first occurrence.
pub fn reconcile<B, I>(base_labels: B, incoming_labels: I) -> LabelMap
where
    B: IntoIterator,
    B::Item: AsRef<str>,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut map = LabelMap::default();
    for label in base_labels {
        map.push(label.as_ref());
    }
    let known = map.len();
    for label in incoming_labels {
        map.push(label.as_ref());
    }
    tracing::debug!(known, added = map.len() - known, "label map reconciled");
    map
}

impl Serialize for LabelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut m = serializer.serialize_map(Some(self.order.len()))?;
        for (label, idx) in self.iter() {
            m.serialize_entry(label, &idx)?;
        }
        m.end()
    }
}

impl<'de> Deserialize<'de> for LabelMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = Vec<(String, usize)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping label to class index")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, idx)) = access.next_entry::<String, usize>()? {
                    pairs.push((label, idx));
                }
                Ok(pairs)
            }
        }

        let pairs = deserializer.deserialize_map(PairsVisitor)?;
        LabelMap::from_pairs(pairs).map_err(serde::de::Error::custom)
    }
}
