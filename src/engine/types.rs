use crate::labels::LabelMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorOut {
    pub python_exe: String,
    pub python_version: String,
    pub framework_version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// How the trainer should obtain its network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelBuilder {
    /// Fresh network from scratch.
    Basic,
    /// Reuse the base model's feature extractor with a new classifier head.
    Update { base_model: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hparams {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub validation_split: f64,
}

/// Everything the trainer needs besides the label map and the data itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainJob {
    pub model_code: String,
    pub builder: ModelBuilder,
    /// Where the merged corpus already sits in canonical CSV form.
    pub dataset_csv: PathBuf,
    pub primary_model_path: PathBuf,
    pub full_model_path: PathBuf,
    pub hparams: Hparams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Deployable (quantized) artifact; its URL is the job result.
    pub primary_artifact: PathBuf,
    /// Full-precision model, uploaded in the background when present.
    #[serde(default)]
    pub full_model: Option<PathBuf>,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

/// Request the training script reads from stdin.
#[derive(Debug, Clone, Serialize)]
pub struct TrainIn<'a> {
    pub cmd: &'static str,
    pub label_map: &'a LabelMap,
    pub sample_count: usize,
    pub feature_len: usize,
    pub job: &'a TrainJob,
}

/// Response the training script writes to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOut {
    pub ok: bool,
    #[serde(default)]
    pub primary_artifact: Option<PathBuf>,
    #[serde(default)]
    pub full_model: Option<PathBuf>,
    #[serde(default)]
    pub metrics: serde_json::Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}
