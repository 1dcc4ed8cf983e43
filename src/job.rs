//! Job bookkeeping: lifecycle states, the status view callers poll, and the
//! shared store the worker pool writes into.

use crate::{error::JobError, labels::LabelMap, util::now_rfc3339};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// `PENDING → PROGRESS* → SUCCESS | FAILURE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Pending => next != JobState::Pending,
            JobState::Progress => next != JobState::Pending,
            JobState::Success | JobState::Failure => false,
        }
    }
}

/// Incoming retraining request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRequest {
    /// Code of the base model being extended.
    pub model_code: String,
    /// Raw landmark rows, one per captured frame.
    pub landmarks: Vec<Vec<f64>>,
    pub gesture: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub artifact_url: String,
    pub model_code: String,
    pub label_map: LabelMap,
    pub label_map_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub progress: Option<JobProgress>,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub submitted_at: String,
    pub finished_at: Option<String>,
}

impl JobStatus {
    fn pending(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Pending,
            progress: None,
            result: None,
            error: None,
            submitted_at: now_rfc3339(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True when the job was stopped by the contamination gate rather than by
    /// a fault.
    pub fn is_contamination(&self) -> bool {
        matches!(self.error, Some(JobError::DataContamination { .. }))
    }
}

#[derive(Debug)]
struct JobRecord {
    status: JobStatus,
    finished: Option<Instant>,
}

/// Shared, cloneable job table. Only the worker pool mutates it.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pending(&self, job_id: &str) {
        let record = JobRecord {
            status: JobStatus::pending(job_id),
            finished: None,
        };
        self.inner.write().await.insert(job_id.to_string(), record);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.read().await.get(job_id).map(|r| r.status.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn remove(&self, job_id: &str) {
        self.inner.write().await.remove(job_id);
    }

    /// Moves the job into PROGRESS with a new step descriptor.
    pub async fn set_progress(&self, job_id: &str, step: &str) -> bool {
        let mut jobs = self.inner.write().await;
        let Some(record) = jobs.get_mut(job_id) else {
            warn!(job_id, "progress for unknown job");
            return false;
        };
        if !record.status.state.can_transition_to(JobState::Progress) {
            warn!(job_id, state = ?record.status.state, "ignoring progress on finished job");
            return false;
        }
        debug!(job_id, step, "progress");
        record.status.state = JobState::Progress;
        record.status.progress = Some(JobProgress {
            current_step: step.to_string(),
        });
        true
    }

    /// Records the terminal outcome. A job finishes at most once.
    pub async fn finish(&self, job_id: &str, outcome: Result<JobResult, JobError>) -> bool {
        let mut jobs = self.inner.write().await;
        let Some(record) = jobs.get_mut(job_id) else {
            warn!(job_id, "outcome for unknown job");
            return false;
        };
        let next = if outcome.is_ok() {
            JobState::Success
        } else {
            JobState::Failure
        };
        if !record.status.state.can_transition_to(next) {
            warn!(job_id, state = ?record.status.state, "job already finished");
            return false;
        }
        record.status.state = next;
        record.status.progress = None;
        match outcome {
            Ok(result) => record.status.result = Some(result),
            Err(err) => record.status.error = Some(err),
        }
        record.status.finished_at = Some(now_rfc3339());
        record.finished = Some(Instant::now());
        true
    }

    /// Drops finished jobs older than `retention`; returns how many went.
    pub async fn purge_expired(&self, retention: Duration) -> usize {
        let mut jobs = self.inner.write().await;
        let before = jobs.len();
        jobs.retain(|_, r| r.finished.is_none_or(|t| t.elapsed() < retention));
        before - jobs.len()
    }
}
