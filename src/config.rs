use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub dataset: DatasetCfg,
    #[serde(default)]
    pub contamination: Contamination,
    #[serde(default)]
    pub normalize: Normalize,
    #[serde(default)]
    pub training: Training,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub upload: Upload,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(cfg)
    }

    /// Rejects values that would quietly turn the contamination gate off.
    pub fn validate(&self) -> Result<()> {
        let c = &self.contamination;
        if !(c.tolerance.is_finite() && c.tolerance > 0.0) {
            bail!("contamination.tolerance must be finite and > 0, got {}", c.tolerance);
        }
        if !(c.threshold_percent.is_finite() && (0.0..=100.0).contains(&c.threshold_percent)) {
            bail!(
                "contamination.threshold_percent must be within [0, 100], got {}",
                c.threshold_percent
            );
        }
        Ok(())
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub print_summary: bool,
    pub poll_interval_ms: u64,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub models_dir: String,
    pub work_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            models_dir: "models".into(),
            work_dir: ".gesture-retrain-work".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

impl Paths {
    pub fn models_dir(&self) -> PathBuf {
        PathBuf::from(&self.models_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetCfg {
    /// Expected feature count per sample; 0 accepts whatever the CSV header declares.
    pub feature_len: usize,
    pub label_column: String,
}
impl Default for DatasetCfg {
    fn default() -> Self {
        Self {
            feature_len: 64,
            label_column: "label".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdBoundary {
    /// Reject when rate > threshold.
    Strict,
    /// Reject when rate >= threshold.
    Inclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairScope {
    CrossProduct,
    SameLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contamination {
    pub threshold_percent: f64,
    pub tolerance: f64,
    pub boundary: ThresholdBoundary,
    pub scope: PairScope,
}
impl Default for Contamination {
    fn default() -> Self {
        Self {
            threshold_percent: 10.0,
            tolerance: 1e-7,
            boundary: ThresholdBoundary::Strict,
            scope: PairScope::CrossProduct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalize {
    pub mode: String,
    pub landmark_count: usize,
    pub scale_reference_landmark: usize,
}
impl Default for Normalize {
    fn default() -> Self {
        Self {
            mode: "passthrough".into(),
            landmark_count: 21,
            scale_reference_landmark: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    pub builder: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub python_exe: String,
    pub script: String,
    pub timeout_seconds: u64,
    pub doctor_timeout_seconds: u64,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
}
impl Default for Training {
    fn default() -> Self {
        Self {
            builder: "update".into(),
            epochs: 500,
            batch_size: 32,
            learning_rate: 0.0001,
            validation_split: 0.2,
            python_exe: "python3".into(),
            script: "train_model.py".into(),
            timeout_seconds: 0,
            doctor_timeout_seconds: 60,
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub workers: usize,
    pub capacity: usize,
    pub result_retention_seconds: u64,
    pub sweep_interval_seconds: u64,
}
impl Default for Queue {
    fn default() -> Self {
        Self {
            workers: 2,
            capacity: 32,
            result_retention_seconds: 300,
            sweep_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub publish_dir: String,
    pub public_base_url: String,
    pub upload_full_model: bool,
    pub upload_dataset: bool,
    /// How long the CLI keeps the runtime alive for background uploads.
    pub background_grace_seconds: u64,
}
impl Default for Upload {
    fn default() -> Self {
        Self {
            publish_dir: "published".into(),
            public_base_url: "file://published".into(),
            upload_full_model: true,
            upload_dataset: true,
            background_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub base_dataset_suffix: String,
    pub base_model_suffix: String,
    pub incremental_suffix: String,
    pub combined_suffix: String,
    pub primary_model_suffix: String,
    pub full_model_suffix: String,
    pub label_map_suffix: String,
    pub report_filename: String,
    pub write_report_json: bool,
    pub write_label_map_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            base_dataset_suffix: "_landmarks.csv".into(),
            base_model_suffix: "_model.keras".into(),
            incremental_suffix: "_incremental.csv".into(),
            combined_suffix: ".csv".into(),
            primary_model_suffix: "_model.tflite".into(),
            full_model_suffix: "_model.keras".into(),
            label_map_suffix: "_label_map.json".into(),
            report_filename: "report.json".into(),
            write_report_json: true,
            write_label_map_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_python_stderr: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
            dump_effective_config: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub label_pattern: String,
    pub model_code_pattern: String,
    pub max_samples_per_request: usize,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            label_pattern: r"^[^,\r\n\x22]{1,64}$".into(),
            model_code_pattern: r"^[A-Za-z0-9_\-]{1,64}$".into(),
            max_samples_per_request: 5000,
            pin_scripts_dir: true,
        }
    }
}
