pub mod local;
pub mod native;
pub mod python;
pub mod types;

use crate::{dataset::Dataset, labels::LabelMap};
use anyhow::Result;
use std::path::Path;

pub use types::{DoctorOut, ModelBuilder, TrainJob, TrainedModel};

/// Turns raw captured landmark rows into dataset rows for one gesture.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw_samples: &[Vec<f64>], gesture: &str) -> Result<Dataset>;
}

/// Trains the classifier on the merged corpus. Blocking.
pub trait Trainer: Send + Sync {
    fn doctor(&self) -> Result<DoctorOut>;
    fn train(&self, label_map: &LabelMap, dataset: &Dataset, job: &TrainJob) -> Result<TrainedModel>;
}

/// Publishes artifacts. Blocking; the pipeline decides what runs in the
/// background.
pub trait Uploader: Send + Sync {
    fn upload_primary(&self, model_code: &str, path: &Path) -> Result<String>;
    fn upload_secondary(&self, model_code: &str, path: &Path) -> Result<()>;
}
