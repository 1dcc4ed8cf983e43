//! Bounded job queue drained by a fixed pool of workers.
//!
//! `submit` records the job as PENDING and hands it to the channel; a worker
//! picks it up, runs the pipeline and writes the terminal outcome back into
//! the store. Callers observe everything through `poll`.

use crate::{
    config::Config,
    error::{JobError, RequestError},
    job::{JobStatus, JobStore, TrainingRequest},
    pipeline::{base_dataset_path, Pipeline},
};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

struct QueuedJob {
    job_id: String,
    request: TrainingRequest,
}

pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    store: JobStore,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    model_code_re: Regex,
    cfg: Config,
}

impl JobQueue {
    /// Spawns the worker pool and the retention sweeper. Must be called from
    /// within a tokio runtime.
    pub fn start(pipeline: Pipeline) -> Result<Self, RequestError> {
        let cfg = pipeline.config().clone();
        cfg.validate()
            .map_err(|e| RequestError::InvalidConfig(format!("{e:#}")))?;
        let model_code_re = Regex::new(&cfg.security.model_code_pattern)?;
        let (tx, rx) = mpsc::channel(cfg.queue.capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let store = JobStore::new();
        let cancel = CancellationToken::new();
        let pipeline = Arc::new(pipeline);

        let mut workers = Vec::new();
        for worker_id in 0..cfg.queue.workers.max(1) {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&pipeline),
                store.clone(),
                cancel.clone(),
            )));
        }
        workers.push(tokio::spawn(sweep_loop(
            store.clone(),
            Duration::from_secs(cfg.queue.result_retention_seconds),
            Duration::from_secs(cfg.queue.sweep_interval_seconds.max(1)),
            cancel.clone(),
        )));
        info!(
            workers = cfg.queue.workers.max(1),
            capacity = cfg.queue.capacity.max(1),
            "job queue started"
        );

        Ok(Self {
            tx,
            rx,
            store,
            cancel,
            workers,
            model_code_re,
            cfg,
        })
    }

    /// Validates the request, records it as PENDING and enqueues it. Waits for
    /// channel capacity when the queue is full.
    pub async fn submit(&self, request: TrainingRequest) -> Result<String, RequestError> {
        self.validate(&request)?;
        if self.cancel.is_cancelled() {
            return Err(RequestError::QueueClosed);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        self.store.insert_pending(&job_id).await;
        let queued = QueuedJob {
            job_id: job_id.clone(),
            request,
        };
        if self.tx.send(queued).await.is_err() {
            self.store.remove(&job_id).await;
            return Err(RequestError::QueueClosed);
        }
        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Current view of a job; `None` for unknown or expired ids.
    pub async fn poll(&self, job_id: &str) -> Option<JobStatus> {
        self.store.get(job_id).await
    }

    /// Polls until the job reaches a terminal state or disappears.
    pub async fn wait(&self, job_id: &str, interval: Duration) -> Option<JobStatus> {
        loop {
            let status = self.poll(job_id).await?;
            if status.is_terminal() {
                return Some(status);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Stops taking new work, lets in-flight jobs finish, and fails whatever
    /// was still waiting in the channel.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for w in self.workers {
            if let Err(e) = w.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(job) = rx.try_recv() {
            warn!(job_id = %job.job_id, "dropping queued job at shutdown");
            self.store
                .finish(
                    &job.job_id,
                    Err(JobError::Internal {
                        message: "worker pool shut down before the job started".into(),
                    }),
                )
                .await;
        }
        info!("job queue stopped");
    }

    fn validate(&self, req: &TrainingRequest) -> Result<(), RequestError> {
        if !self.model_code_re.is_match(&req.model_code) {
            return Err(RequestError::InvalidModelCode(req.model_code.clone()));
        }
        if req.gesture.trim().is_empty() {
            return Err(RequestError::EmptyGesture);
        }
        if req.landmarks.is_empty() {
            return Err(RequestError::NoSamples);
        }
        let limit = self.cfg.security.max_samples_per_request;
        if limit > 0 && req.landmarks.len() > limit {
            return Err(RequestError::TooManySamples {
                count: req.landmarks.len(),
                limit,
            });
        }
        if !base_dataset_path(&self.cfg, &req.model_code).is_file() {
            return Err(RequestError::UnknownBaseModel(req.model_code.clone()));
        }
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    pipeline: Arc<Pipeline>,
    store: JobStore,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(QueuedJob { job_id, request }) = next else {
            break;
        };

        let span = info_span!("job", job_id = %job_id, base = %request.model_code, worker_id);
        let run = {
            let pipeline = Arc::clone(&pipeline);
            let store = store.clone();
            let job_id = job_id.clone();
            async move { pipeline.run_job(&job_id, request, &store).await }.instrument(span)
        };
        // A panic inside the pipeline must still leave the job in a terminal state.
        let outcome = tokio::spawn(run)
            .await
            .unwrap_or_else(|e| Err(JobError::internal(format!("job task panicked: {e}"))));
        match &outcome {
            Ok(result) => info!(
                job_id = %job_id,
                model_code = %result.model_code,
                "job succeeded: {}",
                result.artifact_url
            ),
            Err(err @ JobError::DataContamination { .. }) => {
                warn!(job_id = %job_id, kind = err.kind(), "job rejected: {err}")
            }
            Err(err) => error!(job_id = %job_id, kind = err.kind(), "job failed: {err}"),
        }
        store.finish(&job_id, outcome).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn sweep_loop(
    store: JobStore,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let purged = store.purge_expired(retention).await;
                if purged > 0 {
                    debug!(purged, "expired job results purged");
                }
            }
        }
    }
}
