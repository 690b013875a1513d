//! Asynchronous job execution on top of [`Pipeline`].

use super::store::{Job, JobResult, JobStatus, JobStore, PROCESSING_PROGRESS_CAP};
use crate::error::{JobError, Stage};
use crate::output::DocumentResult;
use crate::pipeline::validate::FieldStatus;
use crate::process::{CancelFlag, Pipeline, ProcessOptions};
use crate::progress::PipelineProgressCallback;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Runs one document per job, at most `workers` at a time.
pub struct JobManager {
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
    permits: Arc<Semaphore>,
    cancels: Arc<Mutex<HashMap<String, CancelFlag>>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("store", &self.store)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl JobManager {
    /// Worker count comes from `pipeline.config().workers`.
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<JobStore>) -> Self {
        let workers = pipeline.config().workers.max(1);
        Self {
            pipeline,
            store,
            permits: Arc::new(Semaphore::new(workers)),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Queue `path` for processing and return the job id immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, path: impl Into<PathBuf>, opts: ProcessOptions) -> String {
        let path = path.into();
        let filename = crate::pipeline::input::display_name(&path);
        self.spawn(path, filename, opts, false)
    }

    /// Store uploaded bytes in the upload directory and queue them.
    /// The stored copy is removed once the job finishes.
    pub async fn submit_upload(
        &self,
        filename: &str,
        bytes: &[u8],
        opts: ProcessOptions,
    ) -> Result<String, JobError> {
        let dir = self.pipeline.config().resolved_upload_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| JobError::Upload(format!("{}: {}", dir.display(), e)))?;

        let stored = dir.join(format!("{}_{}", uuid::Uuid::new_v4(), sanitize(filename)));
        tokio::fs::write(&stored, bytes)
            .await
            .map_err(|e| JobError::Upload(format!("{}: {}", stored.display(), e)))?;
        debug!("Stored upload {} as {}", filename, stored.display());

        Ok(self.spawn(stored, filename.to_string(), opts, true))
    }

    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .get(id)
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Remove a job and its output. A running job stops at its next stage
    /// boundary and cleans up after itself.
    pub async fn delete(&self, id: &str) -> Result<Job, JobError> {
        let job = self
            .store
            .remove(id)
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        if let Some(flag) = lock(&self.cancels).remove(id) {
            flag.cancel();
        }
        for file in &job.artifacts {
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!("Job {}: could not remove {}: {}", id, file.display(), e);
            }
        }
        info!("Job {} deleted ({})", id, job.status);
        Ok(job)
    }

    /// Resolve once the job is completed or failed.
    ///
    /// # Errors
    /// `NotFound` if the job does not exist or is deleted while waiting.
    pub async fn wait(&self, id: &str) -> Result<Job, JobError> {
        let not_found = || JobError::NotFound { id: id.to_string() };
        let mut rx = self.store.subscribe(id).ok_or_else(not_found)?;
        let job = rx
            .wait_for(|j| j.status.is_terminal())
            .await
            .map_err(|_| not_found())?
            .clone();
        Ok(job)
    }

    fn spawn(&self, path: PathBuf, filename: String, opts: ProcessOptions, upload: bool) -> String {
        let parser = opts.parser.clone().unwrap_or_else(|| "auto".to_string());
        let job = Job::new(&path, filename.clone(), parser, opts.format);
        let id = self.store.insert(job);

        let cancel = CancelFlag::new();
        lock(&self.cancels).insert(id.clone(), cancel.clone());

        info!("Job {} queued for {}", id, filename);

        let pipeline = Arc::clone(&self.pipeline);
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let cancels = Arc::clone(&self.cancels);
        let job_id = id.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            // The document runs in its own task so a panic surfaces here as a
            // `JoinError` and still ends the job.
            let worker = tokio::spawn(run_job(
                Arc::clone(&pipeline),
                Arc::clone(&store),
                job_id.clone(),
                path.clone(),
                filename,
                opts,
                cancel.clone(),
            ));
            if let Err(e) = worker.await {
                error!("Job {}: worker aborted: {}", job_id, e);
                if !cancel.is_cancelled() {
                    let _ = store.fail(&job_id, format!("internal error: worker aborted ({e})"));
                }
            }
            lock(&cancels).remove(&job_id);
            if upload {
                let _ = tokio::fs::remove_file(&path).await;
            }
        });

        id
    }
}

async fn run_job(
    pipeline: Arc<Pipeline>,
    store: Arc<JobStore>,
    id: String,
    path: PathBuf,
    filename: String,
    opts: ProcessOptions,
    cancel: CancelFlag,
) {
    let (store, id) = (store.as_ref(), id.as_str());
    if cancel.is_cancelled() || store.transition(id, JobStatus::Processing).is_err() {
        debug!("Job {} removed before it started", id);
        return;
    }

    let progress = JobProgress { store, id };
    let result = pipeline
        .run_document(&path, &filename, &opts, Some(&cancel), &progress)
        .await;

    if cancel.is_cancelled() {
        for file in artifacts(&result) {
            let _ = tokio::fs::remove_file(file).await;
        }
        info!("Job {} cancelled", id);
        return;
    }

    let outcome = match &result.error {
        Some(e) => store.fail(id, e.to_string()),
        None => store.complete(id, job_result(&result), artifacts(&result)),
    };
    match outcome {
        Ok(job) => info!("Job {} {}", id, job.status),
        Err(JobError::NotFound { .. }) => {
            // Deleted after the last stage boundary.
            for file in artifacts(&result) {
                let _ = tokio::fs::remove_file(file).await;
            }
        }
        Err(e) => warn!("Job {}: {}", id, e),
    }
}

fn job_result(result: &DocumentResult) -> JobResult {
    let mut warnings: Vec<String> = result
        .reports
        .iter()
        .enumerate()
        .flat_map(|(i, report)| {
            report
                .issues()
                .filter(|(_, status, _)| *status == FieldStatus::Warning)
                .map(move |(subject, _, message)| format!("record {}: {}: {}", i + 1, subject, message))
        })
        .collect();
    warnings.extend(result.output_warnings().iter().cloned());

    JobResult {
        total_rows: result.rows_exported,
        output_location: result.output.as_ref().map(|o| o.location.clone()),
        warnings,
    }
}

fn artifacts(result: &DocumentResult) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(out) = &result.output {
        files.extend(out.path.iter().cloned());
        if let Some(backup) = &out.backup {
            if !files.contains(backup) {
                files.push(backup.clone());
            }
        }
    }
    files
}

/// Stage-proportional job progress.
struct JobProgress<'a> {
    store: &'a JobStore,
    id: &'a str,
}

impl PipelineProgressCallback for JobProgress<'_> {
    fn on_stage(&self, _name: &str, stage: Stage) {
        let pct = stage.index() * PROCESSING_PROGRESS_CAP as usize / Stage::ALL.len();
        let _ = self.store.set_progress(self.id, pct as u8);
    }

    fn on_document_complete(&self, _result: &DocumentResult) {
        let _ = self.store.set_progress(self.id, PROCESSING_PROGRESS_CAP);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Keep the final path component and replace anything unusual.
fn sanitize(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let clean: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.is_empty() {
        "upload.pdf".to_string()
    } else {
        clean
    }
}
