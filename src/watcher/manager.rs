//! Feeds stable uploads into the encoding queue.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::folder::FolderWatcher;
use super::stability::StabilityChecker;
use crate::config::model::WatchConfig;
use crate::error::WatcherError;
use crate::queue::{EncodingQueue, JobEvent};

/// Watches the upload directory and submits each finished upload.
///
/// A path is not submitted again while its job is queued or running. Once
/// the job ends, a new upload to the same path is picked up like any other.
pub struct WatcherManager {
    /// Directory uploads land in.
    upload_dir: PathBuf,
    /// Watch settings.
    watch: WatchConfig,
    /// Channel for detected files.
    file_rx: mpsc::Receiver<PathBuf>,
    /// Channel sender for detected files (cloned to the folder watcher).
    file_tx: mpsc::Sender<PathBuf>,
    /// Stability checker for detected files.
    stability_checker: StabilityChecker,
    /// Channel for files ready to encode.
    ready_rx: mpsc::Receiver<PathBuf>,
    /// Queue that receives ready files.
    queue: EncodingQueue,
    /// Job lifecycle events from the queue.
    job_events: broadcast::Receiver<JobEvent>,
    /// Paths whose jobs have not finished yet.
    in_flight: HashSet<PathBuf>,
}

impl WatcherManager {
    /// Creates a new watcher manager.
    pub fn new(
        upload_dir: PathBuf,
        watch: WatchConfig,
        queue: EncodingQueue,
        stability_duration: Duration,
        poll_interval: Duration,
    ) -> Self {
        let (file_tx, file_rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = mpsc::channel(100);

        let stability_checker = StabilityChecker::new(stability_duration, poll_interval, ready_tx);
        let job_events = queue.subscribe();

        Self {
            upload_dir,
            watch,
            file_rx,
            file_tx,
            stability_checker,
            ready_rx,
            queue,
            job_events,
            in_flight: HashSet::new(),
        }
    }

    /// Starts watching and runs the submit loop.
    pub async fn start(&mut self, process_existing: bool) -> Result<(), WatcherError> {
        let watcher = FolderWatcher::new(
            self.upload_dir.clone(),
            self.watch.recursive,
            &self.watch.file_patterns,
            self.file_tx.clone(),
        )?;

        if process_existing {
            for path in watcher.scan_existing() {
                self.on_detected(path);
            }
        }

        watcher.start()?;
        info!(path = ?self.upload_dir, "Upload watcher started");

        self.run_loop().await;
        Ok(())
    }

    /// Runs the main event loop.
    async fn run_loop(&mut self) {
        // interval() rejects a zero period
        let period = self.stability_checker.poll_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(path) = self.file_rx.recv() => {
                    self.on_detected(path);
                }

                Some(path) = self.ready_rx.recv() => {
                    self.on_ready(path).await;
                }

                event = self.job_events.recv() => match event {
                    Ok(event) => self.on_job_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed job events; some uploads may need a new write to be picked up");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Queue event channel closed");
                        return;
                    }
                },

                _ = ticker.tick() => {
                    self.stability_checker.check_all().await;
                }
            }
        }
    }

    /// Starts stability tracking unless the path's job is still in flight.
    fn on_detected(&mut self, path: PathBuf) {
        if self.in_flight.contains(&path) {
            debug!(?path, "Ignoring event for upload already in the queue");
            return;
        }
        self.stability_checker.track(path);
    }

    /// Hands a finished upload to the queue.
    async fn on_ready(&mut self, path: PathBuf) {
        if !self.in_flight.insert(path.clone()) {
            return;
        }

        match self.queue.submit(path.clone()).await {
            Ok(name) => info!(job = %name, ?path, "Submitted upload for encoding"),
            Err(e) => {
                error!(?path, error = %e, "Failed to submit upload");
                // Allow a later event to retry the submission
                self.in_flight.remove(&path);
            }
        }
    }

    /// Releases a path once its job has ended.
    fn on_job_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Succeeded { source, .. } | JobEvent::Failed { source, .. } => {
                self.in_flight.remove(&source);
            }
            JobEvent::Queued { .. } | JobEvent::Started { .. } => {}
        }
    }
}
