use crate::{
    combine,
    config::Config,
    dataset::Dataset,
    engine::{ModelBuilder, Normalizer, TrainJob, Trainer, TrainedModel, Uploader, types::Hparams},
    error::JobError,
    gate::{self, GateDecision},
    job::{JobResult, JobStore, TrainingRequest},
    labels::{self, LabelMap},
    report::{JobReport, SampleCounts},
    util::{ensure_dir, generate_model_code, now_rfc3339, sha256_hex},
};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const STEP_NORMALIZING: &str = "normalizing landmarks";
pub const STEP_PREPARING: &str = "preparing data";
pub const STEP_TRAINING: &str = "training model";
pub const STEP_DEPLOYING: &str = "deploying model";

/// File layout for one job: read-only base inputs plus a fresh output
/// directory keyed by the new model code.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub base_dir: PathBuf,
    pub base_csv: PathBuf,
    pub base_model: PathBuf,
    pub base_label_map: PathBuf,
    pub new_dir: PathBuf,
    pub incremental_csv: PathBuf,
    pub combined_csv: PathBuf,
    pub primary_model: PathBuf,
    pub full_model: PathBuf,
    pub label_map: PathBuf,
    pub report: PathBuf,
}

/// Location of a base model's training corpus.
pub fn base_dataset_path(cfg: &Config, base_code: &str) -> PathBuf {
    cfg.paths
        .models_dir()
        .join(base_code)
        .join(format!("{base_code}{}", cfg.output.base_dataset_suffix))
}

impl JobPaths {
    pub fn new(cfg: &Config, base_code: &str, new_code: &str) -> Self {
        let models = cfg.paths.models_dir();
        let out = &cfg.output;
        let base_dir = models.join(base_code);
        let new_dir = models.join(new_code);
        Self {
            base_csv: base_dataset_path(cfg, base_code),
            base_model: base_dir.join(format!("{base_code}{}", out.base_model_suffix)),
            base_label_map: base_dir.join(format!("{base_code}{}", out.label_map_suffix)),
            incremental_csv: new_dir.join(format!("{new_code}{}", out.incremental_suffix)),
            combined_csv: new_dir.join(format!("{new_code}{}", out.combined_suffix)),
            primary_model: new_dir.join(format!("{new_code}{}", out.primary_model_suffix)),
            full_model: new_dir.join(format!("{new_code}{}", out.full_model_suffix)),
            label_map: new_dir.join(format!("{new_code}{}", out.label_map_suffix)),
            report: new_dir.join(&out.report_filename),
            base_dir,
            new_dir,
        }
    }
}

/// Drives one incremental-training request from raw landmarks to a published
/// model. Stages run strictly in order; each collaborator call runs on the
/// blocking pool.
pub struct Pipeline {
    cfg: Config,
    normalizer: Arc<dyn Normalizer>,
    trainer: Arc<dyn Trainer>,
    uploader: Arc<dyn Uploader>,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        normalizer: Arc<dyn Normalizer>,
        trainer: Arc<dyn Trainer>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            normalizer,
            trainer,
            uploader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub async fn run_job(
        &self,
        job_id: &str,
        req: TrainingRequest,
        store: &JobStore,
    ) -> Result<JobResult, JobError> {
        let started = Instant::now();
        let started_at = now_rfc3339();
        let model_code = generate_model_code();
        let paths = JobPaths::new(&self.cfg, &req.model_code, &model_code);
        info!(model_code = %model_code, out = %paths.new_dir.display(), "job started");

        let mut report = JobReport {
            job_id: job_id.to_string(),
            base_model_code: req.model_code.clone(),
            model_code: model_code.clone(),
            gesture: req.gesture.clone(),
            samples: SampleCounts::default(),
            label_map: None,
            gate: None,
            train_metrics: serde_json::Value::Null,
            started: started_at,
            finished: String::new(),
            elapsed_ms: 0,
        };

        // 1. raw landmarks -> incremental CSV
        store.set_progress(job_id, STEP_NORMALIZING).await;
        let normalizer = Arc::clone(&self.normalizer);
        let TrainingRequest {
            landmarks, gesture, ..
        } = req;
        let incoming = blocking(move || normalizer.normalize(&landmarks, &gesture))
            .await?
            .map_err(|e| JobError::NormalizationFailure {
                message: format!("{e:#}"),
            })?;
        ensure_dir(&paths.new_dir).map_err(JobError::internal)?;
        incoming
            .write_csv(&paths.incremental_csv)
            .map_err(JobError::internal)?;

        // 2. load base + incremental
        store.set_progress(job_id, STEP_PREPARING).await;
        let (base, incoming) = {
            let cfg = self.cfg.clone();
            let paths = paths.clone();
            blocking(move || load_inputs(&cfg, &paths))
                .await?
                .map_err(JobError::internal)?
        };
        info!(
            base = base.len(),
            incoming = incoming.len(),
            features = base.feature_len(),
            "datasets loaded"
        );

        // 3. combine + reconcile labels
        let combined = combine::combine_and_save(&base, &incoming, &paths.combined_csv)
            .map_err(JobError::internal)?;
        let base_order = base_label_order(&paths.base_label_map, &base);
        let label_map = labels::reconcile(base_order.labels(), combined.labels());
        info!(classes = label_map.len(), "label map: {}", label_map_line(&label_map));

        report.samples = SampleCounts {
            base: base.len(),
            incoming: incoming.len(),
            combined: combined.len(),
            per_label: combined.label_counts(),
        };
        report.label_map = Some(label_map.clone());

        // 4. contamination gate
        let decision = {
            let cfg = self.cfg.clone();
            let incoming = incoming.clone();
            let base = base.clone();
            blocking(move || gate::evaluate(&cfg, &incoming.grouped(), &base.grouped())).await?
        };
        report.gate = Some(decision.clone());
        if let Some(err) = rejection(&decision) {
            self.write_report(&paths, report, started);
            return Err(err);
        }

        // 5. train
        store.set_progress(job_id, STEP_TRAINING).await;
        let job = self.train_job(&model_code, &paths).map_err(JobError::internal)?;
        let trained = {
            let trainer = Arc::clone(&self.trainer);
            let label_map = label_map.clone();
            blocking(move || trainer.train(&label_map, &combined, &job))
                .await?
                .map_err(|e| JobError::TrainingFailure {
                    message: format!("{e:#}"),
                })?
        };
        info!(artifact = %trained.primary_artifact.display(), "training finished");
        report.train_metrics = trained.metrics.clone();

        let label_map_json = label_map.to_json_pretty().map_err(JobError::internal)?;
        if self.cfg.output.write_label_map_json {
            std::fs::write(&paths.label_map, &label_map_json)
                .map_err(|e| JobError::internal(anyhow!(e).context("writing label map")))?;
        }
        self.write_report(&paths, report, started);

        // 6. deploy
        store.set_progress(job_id, STEP_DEPLOYING).await;
        let artifact_url = {
            let uploader = Arc::clone(&self.uploader);
            let code = model_code.clone();
            let primary = trained.primary_artifact.clone();
            blocking(move || uploader.upload_primary(&code, &primary))
                .await?
                .map_err(|e| JobError::UploadFailure {
                    message: format!("{e:#}"),
                })?
        };
        self.dispatch_secondary_uploads(&model_code, &trained, &paths);

        Ok(JobResult {
            artifact_url,
            model_code,
            label_map_digest: sha256_hex(label_map_json.as_bytes()),
            label_map,
        })
    }

    fn train_job(&self, model_code: &str, paths: &JobPaths) -> Result<TrainJob> {
        let t = &self.cfg.training;
        let builder = match t.builder.as_str() {
            "update" => ModelBuilder::Update {
                base_model: paths.base_model.clone(),
            },
            "basic" => ModelBuilder::Basic,
            other => return Err(anyhow!("unknown training.builder: {other}")),
        };
        Ok(TrainJob {
            model_code: model_code.to_string(),
            builder,
            dataset_csv: paths.combined_csv.clone(),
            primary_model_path: paths.primary_model.clone(),
            full_model_path: paths.full_model.clone(),
            hparams: Hparams {
                epochs: t.epochs,
                batch_size: t.batch_size,
                learning_rate: t.learning_rate,
                validation_split: t.validation_split,
            },
        })
    }

    /// Full-precision model and merged corpus go up in the background; the job
    /// result never waits on them and their failures are only logged.
    fn dispatch_secondary_uploads(&self, model_code: &str, trained: &TrainedModel, paths: &JobPaths) {
        let mut files = Vec::new();
        if self.cfg.upload.upload_full_model {
            if let Some(full) = &trained.full_model {
                files.push(full.clone());
            }
        }
        if self.cfg.upload.upload_dataset {
            files.push(paths.combined_csv.clone());
        }

        for path in files {
            let uploader = Arc::clone(&self.uploader);
            let code = model_code.to_string();
            tokio::spawn(async move {
                let shown = path.display().to_string();
                let res =
                    tokio::task::spawn_blocking(move || uploader.upload_secondary(&code, &path)).await;
                match res {
                    Ok(Ok(())) => debug!("background upload done: {shown}"),
                    Ok(Err(e)) => warn!("background upload failed for {shown}: {e:#}"),
                    Err(e) => warn!("background upload task failed for {shown}: {e}"),
                }
            });
        }
        info!("background uploads dispatched");
    }

    fn write_report(&self, paths: &JobPaths, mut report: JobReport, started: Instant) {
        if !self.cfg.output.write_report_json {
            return;
        }
        report.finished = now_rfc3339();
        report.elapsed_ms = started.elapsed().as_millis();
        let res = serde_json::to_string_pretty(&report)
            .map_err(anyhow::Error::from)
            .and_then(|raw| std::fs::write(&paths.report, raw).map_err(Into::into));
        if let Err(e) = res {
            warn!("failed to write job report {}: {e:#}", paths.report.display());
        }
    }
}

fn rejection(decision: &GateDecision) -> Option<JobError> {
    if decision.accepted {
        None
    } else {
        decision.to_job_error()
    }
}

fn load_inputs(cfg: &Config, paths: &JobPaths) -> Result<(Dataset, Dataset)> {
    let col = &cfg.dataset.label_column;
    let base = Dataset::read_csv(&paths.base_csv, col, cfg.dataset.feature_len)?;
    let incoming = Dataset::read_csv(&paths.incremental_csv, col, cfg.dataset.feature_len)?;
    Ok((base, incoming))
}

/// Base vocabulary order: a persisted label map wins, then any labels only
/// present in the base rows, in first-seen order.
fn base_label_order(saved: &Path, base: &Dataset) -> LabelMap {
    let data_labels = base.labels();
    if !saved.exists() {
        return labels::reconcile(data_labels, Vec::<String>::new());
    }
    match LabelMap::load(saved) {
        Ok(map) => labels::reconcile(map.labels(), data_labels),
        Err(e) => {
            warn!("ignoring unreadable base label map: {e:#}");
            labels::reconcile(data_labels, Vec::<String>::new())
        }
    }
}

fn label_map_line(map: &LabelMap) -> String {
    map.iter()
        .map(|(l, i)| format!("{l}={i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn blocking<T, F>(f: F) -> Result<T, JobError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| JobError::internal(format!("pipeline task failed: {e}")))
}
