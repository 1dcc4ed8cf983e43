use anyhow::{anyhow, Result};
use gesture_retrain::{
    config::Config,
    dataset::{Dataset, LabeledSample},
    engine::{native::NativeNormalizer, DoctorOut, ModelBuilder, TrainJob, TrainedModel, Trainer, Uploader},
    error::{JobError, RequestError},
    job::{JobState, JobStatus, TrainingRequest},
    labels::LabelMap,
    pipeline::Pipeline,
    queue::JobQueue,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BASE: &str = "base01";

struct FakeTrainer {
    fail: bool,
    delay: Duration,
    seen: Mutex<Vec<(LabelMap, usize, ModelBuilder)>>,
}

impl FakeTrainer {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Trainer for FakeTrainer {
    fn doctor(&self) -> Result<DoctorOut> {
        Err(anyhow!("not used"))
    }

    fn train(&self, label_map: &LabelMap, dataset: &Dataset, job: &TrainJob) -> Result<TrainedModel> {
        self.seen
            .lock()
            .unwrap()
            .push((label_map.clone(), dataset.len(), job.builder.clone()));
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(anyhow!("loss went NaN"));
        }
        std::fs::write(&job.primary_model_path, b"tflite")?;
        std::fs::write(&job.full_model_path, b"keras")?;
        Ok(TrainedModel {
            primary_artifact: job.primary_model_path.clone(),
            full_model: Some(job.full_model_path.clone()),
            metrics: serde_json::json!({"accuracy": 0.99}),
        })
    }
}

#[derive(Default)]
struct FakeUploader {
    fail_primary: bool,
    fail_secondary: bool,
    secondary: Mutex<Vec<PathBuf>>,
}

impl Uploader for FakeUploader {
    fn upload_primary(&self, model_code: &str, path: &Path) -> Result<String> {
        if self.fail_primary {
            return Err(anyhow!("503 from bucket"));
        }
        let name = path.file_name().unwrap().to_string_lossy();
        Ok(format!("https://cdn.test/{model_code}/{name}"))
    }

    fn upload_secondary(&self, _model_code: &str, path: &Path) -> Result<()> {
        self.secondary.lock().unwrap().push(path.to_path_buf());
        if self.fail_secondary {
            Err(anyhow!("bucket unavailable"))
        } else {
            Ok(())
        }
    }
}

fn rows(tag: f64, n: usize) -> Vec<Vec<f64>> {
    (0..n).map(|i| vec![tag, i as f64, 0.25, 1.0]).collect()
}

/// Temp models dir holding a rock/paper base model with 50 samples each.
fn setup() -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.paths.models_dir = dir.path().join("models").display().to_string();
    cfg.upload.publish_dir = dir.path().join("published").display().to_string();
    cfg.dataset.feature_len = 4;
    cfg.queue.workers = 2;

    let mut samples: Vec<LabeledSample> = rows(1.0, 50)
        .into_iter()
        .map(|f| LabeledSample::new("rock", f))
        .collect();
    samples.extend(rows(2.0, 50).into_iter().map(|f| LabeledSample::new("paper", f)));
    let base = Dataset::new(4, samples).unwrap();

    let base_dir = cfg.paths.models_dir().join(BASE);
    std::fs::create_dir_all(&base_dir).unwrap();
    base.write_csv(&base_dir.join(format!("{BASE}_landmarks.csv"))).unwrap();
    (dir, cfg)
}

fn pipeline(cfg: &Config, trainer: Arc<FakeTrainer>, uploader: Arc<FakeUploader>) -> Pipeline {
    Pipeline::new(cfg, Arc::new(NativeNormalizer::new(cfg).unwrap()), trainer, uploader)
}

fn request(gesture: &str, landmarks: Vec<Vec<f64>>) -> TrainingRequest {
    TrainingRequest {
        model_code: BASE.into(),
        landmarks,
        gesture: gesture.into(),
    }
}

async fn run_one(queue: &JobQueue, req: TrainingRequest) -> JobStatus {
    let id = queue.submit(req).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(10),
        queue.wait(&id, Duration::from_millis(10)),
    )
    .await
    .expect("job finished in time")
    .expect("job still known")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_gesture_is_trained_and_published() {
    let (_dir, cfg) = setup();
    let trainer = FakeTrainer::new(false);
    let uploader = Arc::new(FakeUploader::default());
    let queue = JobQueue::start(pipeline(&cfg, trainer.clone(), uploader.clone())).unwrap();

    let status = run_one(&queue, request("scissors", rows(3.0, 40))).await;
    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    let result = status.result.unwrap();
    assert_eq!(result.label_map.index_of("rock"), Some(0));
    assert_eq!(result.label_map.index_of("paper"), Some(1));
    assert_eq!(result.label_map.index_of("scissors"), Some(2));
    assert!(result.artifact_url.ends_with("_model.tflite"));
    assert_eq!(result.label_map_digest.len(), 64);

    let seen = trainer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, 140);
    assert!(matches!(&seen[0].2, ModelBuilder::Update { .. }));

    let out_dir = cfg.paths.models_dir().join(&result.model_code);
    let combined = Dataset::read_csv(&out_dir.join(format!("{}.csv", result.model_code)), "label", 4).unwrap();
    assert_eq!(combined.len(), 140);
    assert!(out_dir.join(format!("{}_incremental.csv", result.model_code)).is_file());
    assert!(out_dir.join(format!("{}_label_map.json", result.model_code)).is_file());
    assert!(out_dir.join("report.json").is_file());

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contaminated_gesture_is_rejected_before_training() {
    let (_dir, cfg) = setup();
    let trainer = FakeTrainer::new(false);
    let queue = JobQueue::start(pipeline(&cfg, trainer.clone(), Arc::new(FakeUploader::default()))).unwrap();

    let mut landmarks = rows(1.0, 15);
    landmarks.extend(rows(9.0, 25));
    let status = run_one(&queue, request("rock2", landmarks)).await;

    assert_eq!(status.state, JobState::Failure);
    assert!(status.is_contamination());
    assert_eq!(
        status.error,
        Some(JobError::DataContamination {
            incoming_label: "rock2".into(),
            existing_label: "rock".into(),
            duplicate_rate: 37.5,
            threshold_percent: 10.0,
        })
    );
    assert!(status.result.is_none());
    assert!(trainer.seen.lock().unwrap().is_empty());

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trainer_error_is_classified() {
    let (_dir, cfg) = setup();
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(true), Arc::new(FakeUploader::default()))).unwrap();

    let status = run_one(&queue, request("scissors", rows(3.0, 10))).await;
    assert_eq!(status.state, JobState::Failure);
    match status.error {
        Some(JobError::TrainingFailure { message }) => assert!(message.contains("NaN")),
        other => panic!("unexpected error: {other:?}"),
    }

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_landmarks_fail_normalization() {
    let (_dir, cfg) = setup();
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default()))).unwrap();

    let status = run_one(&queue, request("scissors", vec![vec![1.0, 2.0, 3.0]])).await;
    assert_eq!(status.state, JobState::Failure);
    assert!(matches!(status.error, Some(JobError::NormalizationFailure { .. })));

    // Nothing but the base model directory is left behind.
    let dirs: Vec<_> = std::fs::read_dir(cfg.paths.models_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(dirs, [BASE]);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn secondary_upload_failure_does_not_fail_the_job() {
    let (_dir, cfg) = setup();
    let uploader = Arc::new(FakeUploader {
        fail_secondary: true,
        ..Default::default()
    });
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), uploader.clone())).unwrap();

    let status = run_one(&queue, request("scissors", rows(3.0, 40))).await;
    assert_eq!(status.state, JobState::Success);

    // Background uploads are detached; give them a moment to run.
    for _ in 0..100 {
        if uploader.secondary.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(uploader.secondary.lock().unwrap().len(), 2);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_requests_are_refused_at_submit() {
    let (_dir, cfg) = setup();
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default()))).unwrap();

    let mut req = request("scissors", rows(3.0, 1));
    req.model_code = "../etc".into();
    assert!(matches!(queue.submit(req).await, Err(RequestError::InvalidModelCode(_))));

    let mut req = request("scissors", rows(3.0, 1));
    req.model_code = "missing01".into();
    assert!(matches!(queue.submit(req).await, Err(RequestError::UnknownBaseModel(_))));

    assert!(matches!(
        queue.submit(request("  ", rows(3.0, 1))).await,
        Err(RequestError::EmptyGesture)
    ));
    assert!(matches!(
        queue.submit(request("scissors", Vec::new())).await,
        Err(RequestError::NoSamples)
    ));
    assert_eq!(queue.store().len().await, 0);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_job_id_polls_as_none() {
    let (_dir, cfg) = setup();
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default()))).unwrap();
    assert!(queue.poll("no-such-job").await.is_none());
    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn primary_upload_error_fails_the_job() {
    let (_dir, cfg) = setup();
    let uploader = Arc::new(FakeUploader {
        fail_primary: true,
        ..Default::default()
    });
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), uploader)).unwrap();

    let status = run_one(&queue, request("scissors", rows(3.0, 40))).await;
    assert_eq!(status.state, JobState::Failure);
    match status.error {
        Some(JobError::UploadFailure { message }) => assert!(message.contains("503")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(status.result.is_none());

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finishes_running_job_and_fails_queued_ones() {
    let (_dir, mut cfg) = setup();
    cfg.queue.workers = 1;
    let trainer = FakeTrainer::slow(Duration::from_millis(300));
    let queue = JobQueue::start(pipeline(&cfg, trainer, Arc::new(FakeUploader::default()))).unwrap();
    let store = queue.store().clone();

    let first = queue.submit(request("scissors", rows(3.0, 10))).await.unwrap();
    let second = queue.submit(request("ok", rows(4.0, 10))).await.unwrap();

    // The single worker must hold the first job before the pool is stopped.
    for _ in 0..500 {
        if store.get(&first).await.unwrap().state != JobState::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_ne!(store.get(&first).await.unwrap().state, JobState::Pending);

    queue.shutdown().await;

    let a = store.get(&first).await.unwrap();
    assert_eq!(a.state, JobState::Success, "{:?}", a.error);
    let b = store.get(&second).await.unwrap();
    assert_eq!(b.state, JobState::Failure);
    assert!(matches!(b.error, Some(JobError::Internal { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persisted_base_label_map_sets_index_order() {
    let (_dir, cfg) = setup();
    let saved = cfg
        .paths
        .models_dir()
        .join(BASE)
        .join(format!("{BASE}_label_map.json"));
    std::fs::write(&saved, r#"{"paper": 0, "rock": 1}"#).unwrap();
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default()))).unwrap();

    let status = run_one(&queue, request("scissors", rows(3.0, 40))).await;
    assert_eq!(status.state, JobState::Success, "{:?}", status.error);
    let map = status.result.unwrap().label_map;
    assert_eq!(map.labels(), ["paper", "rock", "scissors"]);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_request_is_refused() {
    let (_dir, mut cfg) = setup();
    cfg.security.max_samples_per_request = 5;
    let queue = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default()))).unwrap();

    assert!(matches!(
        queue.submit(request("scissors", rows(3.0, 6))).await,
        Err(RequestError::TooManySamples { count: 6, limit: 5 })
    ));
    assert!(queue.submit(request("scissors", rows(3.0, 5))).await.is_ok());

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_refuses_a_config_that_disables_the_gate() {
    let (_dir, mut cfg) = setup();
    cfg.contamination.tolerance = -1.0;
    let res = JobQueue::start(pipeline(&cfg, FakeTrainer::new(false), Arc::new(FakeUploader::default())));
    assert!(matches!(res, Err(RequestError::InvalidConfig(_))));
}
