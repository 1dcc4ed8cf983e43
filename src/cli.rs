use crate::{
    combine,
    config::Config,
    dataset::Dataset,
    engine::{local::LocalUploader, native::NativeNormalizer, python::PythonTrainer, Trainer},
    gate, labels,
    job::{JobState, TrainingRequest},
    pipeline::Pipeline,
    queue::JobQueue,
    util::{ensure_dir, now_rfc3339, sha256_hex},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "gesture-retrain")]
#[command(about = "Incremental gesture-classifier retraining (label reconciliation + contamination gate + job queue)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./gesture-retrain.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the training script and its Python environment.
    Doctor {},
    /// Run the contamination gate between two dataset CSVs.
    Check {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
    },
    /// Print the reconciled label map for base + incoming CSVs.
    Labels {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
    },
    /// Retrain a base model with new landmark samples and wait for the outcome.
    Run {
        #[arg(long)]
        model_code: String,
        #[arg(long)]
        gesture: String,
        /// JSON file holding an array of landmark rows.
        #[arg(long)]
        landmarks: PathBuf,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Check { base, incoming } => check(&cfg, base, incoming),
        Command::Labels { base, incoming } => show_labels(&cfg, base, incoming),
        Command::Run {
            model_code,
            gesture,
            landmarks,
        } => run(&cfg, model_code, gesture, landmarks),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("gesture-retrain.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("gesture-retrain.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.work_dir).join("gesture-retrain.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let trainer = PythonTrainer::new(cfg)?;
    let diag = trainer.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn load(cfg: &Config, path: &Path) -> Result<Dataset> {
    Dataset::read_csv(path, &cfg.dataset.label_column, cfg.dataset.feature_len)
}

fn check(cfg: &Config, base: &Path, incoming: &Path) -> Result<()> {
    let base_ds = load(cfg, base)?;
    let inc_ds = load(cfg, incoming)?;
    let decision = gate::evaluate(cfg, &inc_ds.grouped(), &base_ds.grouped());
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "base": base,
            "incoming": incoming,
            "decision": decision,
        }))?
    );
    Ok(())
}

fn show_labels(cfg: &Config, base: &Path, incoming: &Path) -> Result<()> {
    let base_ds = load(cfg, base)?;
    let inc_ds = load(cfg, incoming)?;
    let combined = combine::combine(&base_ds, &inc_ds)?;
    let map = labels::reconcile(base_ds.labels(), combined.labels());
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "label_map": map,
            "counts": combined.label_counts(),
        }))?
    );
    Ok(())
}

fn run(cfg: &Config, model_code: &str, gesture: &str, landmarks: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(landmarks)
        .with_context(|| format!("reading landmarks: {}", landmarks.display()))?;
    let rows: Vec<Vec<f64>> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing landmarks JSON: {}", landmarks.display()))?;

    ensure_dir(Path::new(&cfg.paths.work_dir))?;
    ensure_dir(&cfg.paths.models_dir())?;
    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(Path::new(&cfg.paths.work_dir).join("effective-config.toml"), raw)?;
    }
    info!(
        config_digest = %sha256_hex(cfg.normalized_for_hash().as_bytes()),
        "starting run at {}",
        now_rfc3339()
    );

    let pipeline = Pipeline::new(
        cfg,
        Arc::new(NativeNormalizer::new(cfg)?),
        Arc::new(PythonTrainer::new(cfg)?),
        Arc::new(LocalUploader::new(cfg)),
    );
    let request = TrainingRequest {
        model_code: model_code.to_string(),
        landmarks: rows,
        gesture: gesture.to_string(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;

    let status = rt.block_on(async {
        let queue = JobQueue::start(pipeline)?;
        let job_id = queue.submit(request).await?;
        let status = queue
            .wait(&job_id, Duration::from_millis(cfg.global.poll_interval_ms.max(10)))
            .await;
        queue.shutdown().await;
        let status = status.ok_or_else(|| anyhow!("job {job_id} disappeared before finishing"))?;
        anyhow::Ok(status)
    })?;

    // Give detached secondary uploads a chance to land before the runtime goes.
    rt.shutdown_timeout(Duration::from_secs(cfg.upload.background_grace_seconds));

    if cfg.global.print_summary {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    match (status.state, &status.error) {
        (JobState::Success, _) => Ok(()),
        (_, Some(err)) => Err(anyhow!("job {} failed: {err}", status.job_id)),
        (state, None) => Err(anyhow!("job {} ended in {:?}", status.job_id, state)),
    }
}
