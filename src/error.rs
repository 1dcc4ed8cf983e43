//! Typed failure outcomes.
//!
//! `JobError` is what a caller reads back from a finished job; `DatasetError`
//! marks contract violations inside the data pipeline; `RequestError` is
//! returned from `submit` before a job ever exists.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified reason a job ended in FAILURE.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobError {
    #[error("landmark normalization failed: {message}")]
    NormalizationFailure { message: String },

    /// The contamination gate rejected the merge. This is an expected business
    /// outcome, not a bug.
    #[error(
        "gesture '{incoming_label}' is too similar to existing gesture '{existing_label}' \
         ({duplicate_rate:.2}% duplicates, threshold {threshold_percent}%)"
    )]
    DataContamination {
        incoming_label: String,
        existing_label: String,
        duplicate_rate: f64,
        threshold_percent: f64,
    },

    #[error("model training failed: {message}")]
    TrainingFailure { message: String },

    #[error("primary artifact upload failed: {message}")]
    UploadFailure { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl JobError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        JobError::Internal {
            message: format!("{err:#}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::NormalizationFailure { .. } => "NormalizationFailure",
            JobError::DataContamination { .. } => "DataContamination",
            JobError::TrainingFailure { .. } => "TrainingFailure",
            JobError::UploadFailure { .. } => "UploadFailure",
            JobError::Internal { .. } => "Internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("feature length mismatch: base has {base}, incoming has {incoming}")]
    FeatureLenMismatch { base: usize, incoming: usize },

    #[error("sample {index} has {actual} features, expected {expected}")]
    RaggedSample {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid base model code: {0:?}")]
    InvalidModelCode(String),

    #[error("gesture label is empty")]
    EmptyGesture,

    #[error("request carries no landmark samples")]
    NoSamples,

    #[error("request carries {count} samples, limit is {limit}")]
    TooManySamples { count: usize, limit: usize },

    #[error("base model not found: {0}")]
    UnknownBaseModel(String),

    #[error("job queue is shut down")]
    QueueClosed,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid security pattern in config")]
    Pattern(#[from] regex::Error),
}
