//! In-memory landmark datasets and their canonical CSV form.
//!
//! On disk every dataset (base, incremental, combined) uses the same layout:
//! a `label` column followed by `0..N-1` feature columns. Readers locate the
//! label column by name so older files with the label last still load.

use crate::error::DatasetError;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

pub type FeatureVector = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    label: String,
    features: FeatureVector,
}

impl LabeledSample {
    pub fn new(label: impl Into<String>, features: FeatureVector) -> Self {
        Self {
            label: label.into(),
            features,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn features(&self) -> &[f64] {
        &self.features
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_len: usize,
    samples: Vec<LabeledSample>,
}

impl Dataset {
    /// Builds a dataset, rejecting samples whose length differs from `feature_len`.
    pub fn new(feature_len: usize, samples: Vec<LabeledSample>) -> Result<Self, DatasetError> {
        for (index, s) in samples.iter().enumerate() {
            if s.features.len() != feature_len {
                return Err(DatasetError::RaggedSample {
                    index,
                    expected: feature_len,
                    actual: s.features.len(),
                });
            }
        }
        Ok(Self {
            feature_len,
            samples,
        })
    }

    pub fn empty(feature_len: usize) -> Self {
        Self {
            feature_len,
            samples: Vec::new(),
        }
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.samples
            .iter()
            .filter(|s| seen.insert(s.label.as_str()))
            .map(|s| s.label.clone())
            .collect()
    }

    /// Sample count per label, keyed lexicographically.
    pub fn label_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.samples {
            *counts.entry(s.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Feature vectors grouped by label; map order is lexicographic so that
    /// pairwise scans over two groupings are reproducible.
    pub fn grouped(&self) -> BTreeMap<String, Vec<FeatureVector>> {
        let mut groups: BTreeMap<String, Vec<FeatureVector>> = BTreeMap::new();
        for s in &self.samples {
            groups
                .entry(s.label.clone())
                .or_default()
                .push(s.features.clone());
        }
        groups
    }

    /// Reads a CSV with a header row. `expected_len` of 0 accepts the header's
    /// feature count.
    pub fn read_csv(path: &Path, label_column: &str, expected_len: usize) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading dataset: {}", path.display()))?;
        Self::parse_csv(&raw, label_column, expected_len)
            .with_context(|| format!("parsing dataset: {}", path.display()))
    }

    pub fn parse_csv(raw: &str, label_column: &str, expected_len: usize) -> Result<Self> {
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| anyhow!("missing header row"))?;
        let columns: Vec<String> = split_row(header);
        let label_idx = columns
            .iter()
            .position(|c| c == label_column)
            .ok_or_else(|| anyhow!("no '{label_column}' column in header"))?;
        let feature_len = columns.len() - 1;
        if expected_len != 0 && feature_len != expected_len {
            bail!("header declares {feature_len} features, expected {expected_len}");
        }

        let mut samples = Vec::new();
        for (row_no, line) in lines.enumerate() {
            let fields = split_row(line);
            if fields.len() != columns.len() {
                bail!(
                    "row {} has {} columns, header has {}",
                    row_no + 1,
                    fields.len(),
                    columns.len()
                );
            }
            let mut label = String::new();
            let mut features = Vec::with_capacity(feature_len);
            for (i, field) in fields.into_iter().enumerate() {
                if i == label_idx {
                    label = field;
                    continue;
                }
                let v: f64 = field.trim().parse().with_context(|| {
                    format!("row {} column {}: not a number: {:?}", row_no + 1, i, field)
                })?;
                features.push(v);
            }
            samples.push(LabeledSample::new(label, features));
        }

        Ok(Self::new(feature_len, samples)?)
    }

    /// Canonical form: `label,0,1,...,N-1`, label first.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("label");
        for i in 0..self.feature_len {
            let _ = write!(out, ",{i}");
        }
        out.push('\n');
        for s in &self.samples {
            out.push_str(&quote_field(&s.label));
            for v in &s.features {
                let _ = write!(out, ",{v}");
            }
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv())
            .with_context(|| format!("writing dataset: {}", path.display()))
    }
}

fn quote_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_column_may_be_last() {
        let raw = "0,1,label\n0.5,1.5,rock\n2,3,paper\n";
        let ds = Dataset::parse_csv(raw, "label", 2).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.samples()[1].label(), "paper");
        assert_eq!(ds.samples()[1].features(), &[2.0, 3.0]);
    }

    #[test]
    fn quoted_labels_survive() {
        let ds = Dataset::new(1, vec![LabeledSample::new("a,\"b\"", vec![1.0])]).unwrap();
        let back = Dataset::parse_csv(&ds.to_csv(), "label", 1).unwrap();
        assert_eq!(back.samples()[0].label(), "a,\"b\"");
    }

    #[test]
    fn rejects_short_rows() {
        let raw = "label,0,1\nrock,1\n";
        assert!(Dataset::parse_csv(raw, "label", 0).is_err());
    }

    #[test]
    fn rejects_unexpected_width() {
        let raw = "label,0,1\nrock,1,2\n";
        assert!(Dataset::parse_csv(raw, "label", 64).is_err());
    }
}
