use crate::{dataset::Dataset, error::DatasetError};
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Base rows first, then incoming rows. No dedup, no label encoding.
pub fn combine(base: &Dataset, incoming: &Dataset) -> Result<Dataset, DatasetError> {
    if base.feature_len() != incoming.feature_len() {
        return Err(DatasetError::FeatureLenMismatch {
            base: base.feature_len(),
            incoming: incoming.feature_len(),
        });
    }
    let mut samples = Vec::with_capacity(base.len() + incoming.len());
    samples.extend(base.samples().iter().cloned());
    samples.extend(incoming.samples().iter().cloned());
    Dataset::new(base.feature_len(), samples)
}

/// Combines and writes the canonical CSV in one step.
pub fn combine_and_save(base: &Dataset, incoming: &Dataset, out: &Path) -> Result<Dataset> {
    let combined = combine(base, incoming)?;
    combined.write_csv(out)?;
    info!(
        samples = combined.len(),
        features = combined.feature_len(),
        "combined dataset saved: {}",
        out.display()
    );
    Ok(combined)
}
