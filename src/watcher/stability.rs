//! Holds uploads back until their size stops changing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reports a file once its size has been unchanged for a set duration.
pub struct StabilityChecker {
    stability_duration: Duration,
    poll_interval: Duration,
    tracked_files: HashMap<PathBuf, SizeWatch>,
    /// Receives each file once it is stable.
    ready_tx: mpsc::Sender<PathBuf>,
}

struct SizeWatch {
    size: u64,
    /// Set when two consecutive polls saw the same non-zero size.
    unchanged_since: Option<Instant>,
}

enum Poll {
    Ready,
    Waiting,
    Gone,
}

impl SizeWatch {
    fn poll(&mut self, path: &Path, settle: Duration) -> Poll {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(?path, error = %e, "Tracked upload is no longer readable");
                return Poll::Gone;
            }
        };

        if size == 0 || size != self.size {
            if self.unchanged_since.take().is_some() {
                debug!(?path, old_size = self.size, new_size = size, "Upload is still being written");
            }
            self.size = size;
            return Poll::Waiting;
        }

        let since = *self.unchanged_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= settle {
            Poll::Ready
        } else {
            Poll::Waiting
        }
    }
}

impl StabilityChecker {
    /// Creates a checker that hands stable files to `ready_tx`.
    pub fn new(
        stability_duration: Duration,
        poll_interval: Duration,
        ready_tx: mpsc::Sender<PathBuf>,
    ) -> Self {
        Self {
            stability_duration,
            poll_interval,
            tracked_files: HashMap::new(),
            ready_tx,
        }
    }

    /// Starts tracking a file. Tracking the same path twice is a no-op.
    pub fn track(&mut self, path: PathBuf) {
        if self.tracked_files.contains_key(&path) {
            return;
        }

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        debug!(?path, size, "Waiting for upload to settle");

        self.tracked_files.insert(
            path,
            SizeWatch {
                size,
                unchanged_since: None,
            },
        );
    }

    /// Polls every tracked file and forwards the ones that settled.
    pub async fn check_all(&mut self) {
        let settle = self.stability_duration;
        let mut ready = Vec::new();

        self.tracked_files.retain(|path, watch| match watch.poll(path, settle) {
            Poll::Ready => {
                ready.push(path.clone());
                false
            }
            Poll::Waiting => true,
            Poll::Gone => false,
        });

        for path in ready {
            info!(?path, settle_secs = settle.as_secs(), "Upload is complete");
            if let Err(e) = self.ready_tx.send(path).await {
                warn!(error = %e, "Ready channel closed");
            }
        }
    }

    /// How often `check_all` should be called.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked_files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stable_files_are_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abc123.mp4");
        std::fs::write(&path, [1u8; 64]).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let mut checker = StabilityChecker::new(Duration::ZERO, Duration::from_millis(10), tx);
        checker.track(path.clone());
        checker.track(path.clone());
        assert_eq!(checker.tracked_count(), 1);

        checker.check_all().await;

        assert_eq!(rx.try_recv().unwrap(), path);
        assert_eq!(checker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn growing_files_are_held_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abc123.mp4");
        std::fs::write(&path, [1u8; 64]).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let mut checker = StabilityChecker::new(Duration::ZERO, Duration::from_millis(10), tx);
        checker.track(path.clone());

        std::fs::write(&path, [1u8; 128]).unwrap();
        checker.check_all().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(checker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn deleted_files_stop_being_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("abc123.mp4");
        std::fs::write(&path, [1u8; 64]).unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let mut checker = StabilityChecker::new(Duration::from_secs(60), Duration::from_secs(1), tx);
        checker.track(path.clone());
        std::fs::remove_file(&path).unwrap();

        checker.check_all().await;
        assert_eq!(checker.tracked_count(), 0);
    }
}
