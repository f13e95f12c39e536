//! Single-worker FIFO encoding queue.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Notify};
use tracing::{error, info, warn};

use super::upload::{self, UploadSummary};
use crate::encoder::Transcoder;
use crate::error::{PipelineError, QueueError, StatusStoreError};
use crate::notify::prometheus::Metrics;
use crate::status::{EncodingJob, EncodingStatus, StatusStore};
use crate::storage::Uploader;

const EVENT_CAPACITY: usize = 256;

/// Settings applied to every job the queue runs.
#[derive(Debug, Clone, Default)]
pub struct QueueSettings {
    /// Object key prefix for uploaded files.
    pub key_prefix: String,
    /// Upper bound for one job's transcode and upload. `None` waits forever.
    pub job_timeout: Option<Duration>,
}

/// Lifecycle notifications for callers that want more than polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The job's pending record was written and it joined the queue.
    Queued { name: String },
    /// The worker picked the job up.
    Started { name: String },
    /// Everything was uploaded and local files were removed.
    Succeeded {
        name: String,
        source: PathBuf,
        playlist_url: Option<String>,
        files: usize,
    },
    /// Transcoding or uploading failed.
    Failed {
        name: String,
        source: PathBuf,
        error: String,
    },
}

/// FIFO and running flag. Only ever locked briefly, never across an await.
#[derive(Debug, Default)]
struct QueueState {
    fifo: VecDeque<EncodingJob>,
    running: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    store: Arc<dyn StatusStore>,
    transcoder: Arc<dyn Transcoder>,
    uploader: Arc<dyn Uploader>,
    settings: QueueSettings,
    events: broadcast::Sender<JobEvent>,
    idle: Notify,
    metrics: Option<Arc<Metrics>>,
}

/// In-process encoding queue with exactly one worker.
///
/// Jobs run strictly in submission order: transcode, upload every output
/// file, remove local files, record the terminal status. A job's steps never
/// interleave with another job's. Cloning yields another handle to the same
/// queue.
#[derive(Clone)]
pub struct EncodingQueue {
    inner: Arc<QueueInner>,
}

impl EncodingQueue {
    /// Creates an idle queue.
    pub fn new(
        store: Arc<dyn StatusStore>,
        transcoder: Arc<dyn Transcoder>,
        uploader: Arc<dyn Uploader>,
        settings: QueueSettings,
    ) -> Self {
        Self::build(store, transcoder, uploader, settings, None)
    }

    /// Creates an idle queue that reports to the given metrics.
    pub fn with_metrics(
        store: Arc<dyn StatusStore>,
        transcoder: Arc<dyn Transcoder>,
        uploader: Arc<dyn Uploader>,
        settings: QueueSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::build(store, transcoder, uploader, settings, Some(metrics))
    }

    fn build(
        store: Arc<dyn StatusStore>,
        transcoder: Arc<dyn Transcoder>,
        uploader: Arc<dyn Uploader>,
        settings: QueueSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                store,
                transcoder,
                uploader,
                settings,
                events,
                idle: Notify::new(),
                metrics,
            }),
        }
    }

    /// Submits a source video and returns the derived job name.
    ///
    /// The queue owns `source_path` from here on. The pending record is
    /// written before the job is queued; if that write fails nothing is
    /// queued. Returns without waiting for the job to run. Failures after
    /// this point are visible only through the status store.
    pub async fn submit(&self, source_path: impl Into<PathBuf>) -> Result<String, QueueError> {
        self.enqueue(source_path).await.map(|job| job.name)
    }

    /// Like [`submit`](Self::submit), but returns the pending record so the
    /// caller can follow this submission by id.
    pub async fn enqueue(&self, source_path: impl Into<PathBuf>) -> Result<EncodingJob, QueueError> {
        let source_path = source_path.into();
        let job = EncodingJob::pending(source_path.clone())
            .ok_or(QueueError::InvalidSource(source_path))?;

        self.inner.store.insert(&job).await?;

        let depth = {
            let mut state = self.lock_state();
            state.fifo.push_back(job.clone());
            state.fifo.len()
        };

        info!(job = %job.name, id = %job.id, depth, "Queued encoding job");
        self.record_depth(depth);
        let _ = self.inner.events.send(JobEvent::Queued {
            name: job.name.clone(),
        });

        self.drive();
        Ok(job)
    }

    /// Starts the worker on the head of the queue.
    ///
    /// A no-op while a job is running or when the queue is empty. The worker
    /// calls this again after every job, so the queue drains without a
    /// scheduler. Must be called within a tokio runtime.
    pub fn drive(&self) {
        let (job, depth) = {
            let mut state = self.lock_state();
            if state.running {
                return;
            }
            let Some(job) = state.fifo.pop_front() else {
                drop(state);
                self.inner.idle.notify_waiters();
                return;
            };
            state.running = true;
            (job, state.fifo.len())
        };

        self.record_depth(depth);

        let queue = self.clone();
        tokio::spawn(async move {
            let name = job.name.clone();
            let source = job.source_path.clone();
            if let Err(panic) = AssertUnwindSafe(queue.run_job(job)).catch_unwind().await {
                let message = panic_message(&*panic);
                error!(job = %name, panic = %message, "Job handler panicked");
                let _ = queue.inner.events.send(JobEvent::Failed {
                    name,
                    source,
                    error: format!("Job panicked: {}", message),
                });
            }
            queue.lock_state().running = false;
            queue.drive();
        });
    }

    /// Subscribes to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Number of jobs waiting behind the running one.
    pub fn pending_len(&self) -> usize {
        self.lock_state().fifo.len()
    }

    /// Whether a job is currently in its pipeline.
    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Returns the latest status record for a job name.
    pub async fn status(&self, name: &str) -> Result<Option<EncodingJob>, StatusStoreError> {
        self.inner.store.find_by_name(name).await
    }

    /// Returns every status record for a job name, oldest first.
    pub async fn history(&self, name: &str) -> Result<Vec<EncodingJob>, StatusStoreError> {
        self.inner.store.history(name).await
    }

    fn is_idle(&self) -> bool {
        let state = self.lock_state();
        !state.running && state.fifo.is_empty()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // The guarded data stays consistent even if a holder panicked
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one job to a terminal status. Never returns an error.
    async fn run_job(&self, job: EncodingJob) {
        let started = Instant::now();
        info!(job = %job.name, id = %job.id, source = ?job.source_path, "Processing job");

        self.write_status(&job, EncodingStatus::Processing, None).await;
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_jobs_in_progress(1);
        }
        let _ = self.inner.events.send(JobEvent::Started {
            name: job.name.clone(),
        });

        let pipeline = AssertUnwindSafe(self.run_pipeline(&job))
            .catch_unwind()
            .map(|outcome| {
                outcome.unwrap_or_else(|panic| {
                    Err(PipelineError::Panicked(panic_message(&*panic)))
                })
            });

        let result = match self.inner.settings.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, pipeline).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::TimedOut {
                    seconds: limit.as_secs(),
                }),
            },
            None => pipeline.await,
        };

        match result {
            Ok(summary) => {
                info!(
                    job = %job.name,
                    files = summary.urls.len(),
                    playlist = ?summary.playlist_url,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Job completed successfully"
                );
                self.write_status(&job, EncodingStatus::Success, None).await;
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_success(started.elapsed(), summary.urls.len());
                }
                let _ = self.inner.events.send(JobEvent::Succeeded {
                    name: job.name.clone(),
                    source: job.source_path.clone(),
                    playlist_url: summary.playlist_url,
                    files: summary.urls.len(),
                });
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "Job failed");
                self.write_status(&job, EncodingStatus::Failed, Some(e.to_string()))
                    .await;
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_failure();
                }
                let _ = self.inner.events.send(JobEvent::Failed {
                    name: job.name.clone(),
                    source: job.source_path.clone(),
                    error: e.to_string(),
                });
            }
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.set_jobs_in_progress(0);
        }
    }

    /// Transcode, upload, clean up. Local files are only removed on success.
    async fn run_pipeline(&self, job: &EncodingJob) -> Result<UploadSummary, PipelineError> {
        let output_dir = self.inner.transcoder.encode(&job.source_path).await?;

        let summary = upload::upload_all(
            self.inner.uploader.as_ref(),
            &self.inner.settings.key_prefix,
            &job.name,
            &output_dir,
        )
        .await?;

        remove_local(&job.name, &output_dir, &job.source_path).await;
        Ok(summary)
    }

    /// Writes a status change, logging instead of propagating failures.
    async fn write_status(&self, job: &EncodingJob, status: EncodingStatus, message: Option<String>) {
        if let Err(e) = self
            .inner
            .store
            .update_status(&job.id, status, message, Utc::now())
            .await
        {
            warn!(job = %job.name, %status, error = %e, "Failed to record job status");
        }
    }

    fn record_depth(&self, depth: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_queue_depth(depth);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Best-effort removal of a finished job's output directory and source file.
async fn remove_local(name: &str, output_dir: &Path, source: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(output_dir).await {
        warn!(job = %name, path = ?output_dir, error = %e, "Failed to remove output directory");
    }

    // The source may live inside the output directory
    if source.exists() {
        if let Err(e) = tokio::fs::remove_file(source).await {
            warn!(job = %name, path = ?source, error = %e, "Failed to remove source file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MockTranscoder;
    use crate::error::TranscodeError;
    use crate::status::MemoryStatusStore;
    use crate::storage::MockUploader;

    async fn run_single(
        transcoder: MockTranscoder,
        uploader: MockUploader,
        source: &Path,
    ) -> (EncodingJob, Arc<Metrics>) {
        let store = Arc::new(MemoryStatusStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = EncodingQueue::with_metrics(
            store.clone(),
            Arc::new(transcoder),
            Arc::new(uploader),
            QueueSettings::default(),
            metrics.clone(),
        );

        let name = queue.submit(source).await.unwrap();
        queue.wait_idle().await;
        (store.find_by_name(&name).await.unwrap().unwrap(), metrics)
    }

    #[tokio::test]
    async fn transcode_error_skips_upload() {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_encode().times(1).returning(|source| {
            Err(TranscodeError::NoVideoStream(source.to_path_buf()))
        });
        // Any upload call would panic
        let uploader = MockUploader::new();

        let (job, metrics) =
            run_single(transcoder, uploader, Path::new("/uploads/audio-only.mp4")).await;

        assert_eq!(job.status, EncodingStatus::Failed);
        assert!(job.message.unwrap().contains("no video stream"));
        assert!(metrics.gather().unwrap().contains("encodes_total{status=\"failure\"} 1"));
    }

    #[tokio::test]
    async fn empty_output_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().to_path_buf();

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_encode()
            .times(1)
            .returning(move |_| Ok(output.clone()));

        let (job, _) =
            run_single(transcoder, MockUploader::new(), &tmp.path().join("abc123.mp4")).await;

        assert_eq!(job.status, EncodingStatus::Failed);
        assert!(job.message.unwrap().contains("no files"));
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn success_reports_playlist_and_metrics() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("abc123.mp4");
        std::fs::write(&source, b"video").unwrap();
        let output = tmp.path().join("abc123");
        std::fs::create_dir_all(output.join("v0")).unwrap();
        std::fs::write(output.join("master.m3u8"), "#EXTM3U").unwrap();
        std::fs::write(output.join("v0/fileSequence0.ts"), [0u8; 188]).unwrap();

        let encoded = output.clone();
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_encode()
            .times(1)
            .returning(move |_| Ok(encoded.clone()));

        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .times(2)
            .returning(|_, key, _| Ok(format!("https://cdn/{}", key)));

        let store = Arc::new(MemoryStatusStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = EncodingQueue::with_metrics(
            store.clone(),
            Arc::new(transcoder),
            Arc::new(uploader),
            QueueSettings::default(),
            metrics.clone(),
        );
        let mut events = queue.subscribe();

        queue.submit(&source).await.unwrap();
        queue.wait_idle().await;

        let mut succeeded = None;
        while let Ok(event) = events.try_recv() {
            if let JobEvent::Succeeded { playlist_url, files, .. } = event {
                succeeded = Some((playlist_url, files));
            }
        }
        assert_eq!(
            succeeded,
            Some((Some("https://cdn/abc123/master.m3u8".to_string()), 2))
        );
        assert!(!output.exists());
        assert!(!source.exists());

        let text = metrics.gather().unwrap();
        assert!(text.contains("encode_uploaded_files_total 2"));
        assert!(text.contains("encode_queue_depth 0"));
        assert!(text.contains("encode_jobs_in_progress 0"));
    }
}
