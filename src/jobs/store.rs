//! In-memory job records.
//!
//! Each job lives behind a [`watch::Sender`]; readers take snapshots or
//! subscribe and never wait on the worker. The worker that owns a job is the
//! only writer.

use crate::config::OutputFormat;
use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Upper bound for progress while a job is still processing.
pub const PROCESSING_PROGRESS_CAP: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `queued → processing → completed | failed`, nothing else.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Rows written to the output; invalid records are not counted.
    pub total_rows: usize,
    pub output_location: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// 0–100, never decreasing.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub source: PathBuf,
    pub filename: String,
    pub parser_type: String,
    pub output_format: OutputFormat,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Files written for this job, removed when it is deleted.
    pub artifacts: Vec<PathBuf>,
}

impl Job {
    /// A fresh queued job with a v4 id.
    pub fn new(
        source: impl Into<PathBuf>,
        filename: impl Into<String>,
        parser_type: impl Into<String>,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            progress: 0,
            created_at: Utc::now(),
            source: source.into(),
            filename: filename.into(),
            parser_type: parser_type.into(),
            output_format,
            result: None,
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn view(&self) -> JobView {
        JobView::from(self)
    }
}

/// The JSON shape handed to API collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub filename: String,
    pub parser_type: String,
    pub output_format: OutputFormat,
    pub created_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            filename: job.filename.clone(),
            parser_type: job.parser_type.clone(),
            output_format: job.output_format,
            created_at: job.created_at,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

struct Entry {
    seq: u64,
    tx: watch::Sender<Job>,
}

/// Shared registry of jobs.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Entry>>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").field("jobs", &self.len()).finish()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Register a job and return its id.
    pub fn insert(&self, job: Job) -> String {
        let id = job.id.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.write().insert(
            id.clone(),
            Entry {
                seq,
                tx: watch::Sender::new(job),
            },
        );
        id
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).map(|e| e.tx.borrow().clone())
    }

    /// Snapshots of every job, newest first.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.read();
        let mut entries: Vec<(u64, Job)> = jobs
            .values()
            .map(|e| (e.seq, e.tx.borrow().clone()))
            .collect();
        entries.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
        });
        entries.into_iter().map(|(_, job)| job).collect()
    }

    /// Watch a job. The receiver closes when the job is removed.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<Job>> {
        self.read().get(id).map(|e| e.tx.subscribe())
    }

    /// Drop a job; subscribers see the channel close.
    pub fn remove(&self, id: &str) -> Option<Job> {
        self.write().remove(id).map(|e| e.tx.borrow().clone())
    }

    /// Move a job to `to`, applying `update` in the same step.
    fn transition_with(
        &self,
        id: &str,
        to: JobStatus,
        update: impl FnOnce(&mut Job),
    ) -> Result<Job, JobError> {
        let jobs = self.read();
        let entry = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;

        let from = entry.tx.borrow().status;
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        entry.tx.send_modify(|job| {
            job.status = to;
            update(job);
        });
        let job = entry.tx.borrow().clone();
        Ok(job)
    }

    pub fn transition(&self, id: &str, to: JobStatus) -> Result<Job, JobError> {
        self.transition_with(id, to, |_| {})
    }

    /// Raise progress of a processing job. Lower values are ignored and the
    /// value is capped below 100 until completion.
    pub fn set_progress(&self, id: &str, progress: u8) -> Result<(), JobError> {
        let jobs = self.read();
        let entry = jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        let progress = progress.min(PROCESSING_PROGRESS_CAP);
        entry.tx.send_if_modified(|job| {
            if job.status == JobStatus::Processing && progress > job.progress {
                job.progress = progress;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    pub fn complete(
        &self,
        id: &str,
        result: JobResult,
        artifacts: Vec<PathBuf>,
    ) -> Result<Job, JobError> {
        self.transition_with(id, JobStatus::Completed, |job| {
            job.progress = 100;
            job.result = Some(result);
            job.artifacts = artifacts;
        })
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<Job, JobError> {
        let error = error.into();
        self.transition_with(id, JobStatus::Failed, |job| {
            job.error = Some(error);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("/tmp/a.pdf", "a.pdf", "auto", OutputFormat::Csv)
    }

    #[test]
    fn only_legal_transitions() {
        let store = JobStore::new();
        let id = store.insert(job());

        let err = store.transition(&id, JobStatus::Completed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));

        store.transition(&id, JobStatus::Processing).unwrap();
        store.fail(&id, "boom").unwrap();
        let err = store.transition(&id, JobStatus::Completed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));

        let j = store.get(&id).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error.as_deref(), Some("boom"));
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let store = JobStore::new();
        let id = store.insert(job());

        // Ignored while queued.
        store.set_progress(&id, 10).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, 0);

        store.transition(&id, JobStatus::Processing).unwrap();
        store.set_progress(&id, 40).unwrap();
        store.set_progress(&id, 20).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, 40);
        store.set_progress(&id, 100).unwrap();
        assert_eq!(store.get(&id).unwrap().progress, PROCESSING_PROGRESS_CAP);

        let result = JobResult {
            total_rows: 3,
            output_location: Some("out.csv".into()),
            warnings: vec![],
        };
        let done = store.complete(&id, result, vec![]).unwrap();
        assert_eq!(done.progress, 100);
    }

    #[test]
    fn list_is_newest_first() {
        let store = JobStore::new();
        let first = store.insert(job());
        let second = store.insert(job());
        let ids: Vec<String> = store.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(
            store.set_progress("nope", 5),
            Err(JobError::NotFound { .. })
        ));
        assert!(store.remove("nope").is_none());
    }

    #[test]
    fn removal_closes_subscribers() {
        let store = JobStore::new();
        let id = store.insert(job());
        let mut rx = store.subscribe(&id).unwrap();
        store.remove(&id);
        assert!(tokio_test::block_on(rx.changed()).is_err());
    }

    #[test]
    fn subscribers_wake_only_on_real_progress() {
        let store = JobStore::new();
        let id = store.insert(job());
        store.transition(&id, JobStatus::Processing).unwrap();
        let mut rx = store.subscribe(&id).unwrap();

        let mut changed = tokio_test::task::spawn(rx.changed());
        tokio_test::assert_pending!(changed.poll());

        // Not an increase: no notification.
        store.set_progress(&id, 0).unwrap();
        assert!(!changed.is_woken());

        store.set_progress(&id, 30).unwrap();
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
        drop(changed);
        assert_eq!(rx.borrow().progress, 30);
    }

    #[test]
    fn view_serialises_api_shape() {
        let j = job();
        let v = serde_json::to_value(j.view()).unwrap();
        assert_eq!(v["job_id"], j.id.as_str());
        assert_eq!(v["status"], "queued");
        assert_eq!(v["output_format"], "csv");
        assert!(v["result"].is_null());
        assert!(v["error"].is_null());
        assert!(v.get("artifacts").is_none());
    }
}
