use crate::{gate::GateDecision, labels::LabelMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub base_model_code: String,
    pub model_code: String,
    pub gesture: String,
    pub samples: SampleCounts,
    pub label_map: Option<LabelMap>,
    pub gate: Option<GateDecision>,
    pub train_metrics: serde_json::Value,
    pub started: String,
    pub finished: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleCounts {
    pub base: usize,
    pub incoming: usize,
    pub combined: usize,
    pub per_label: BTreeMap<String, usize>,
}
