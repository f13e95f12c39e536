//! Upload folder watching.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::WatcherError;

/// Reports source videos that appear in the upload folder.
pub struct FolderWatcher {
    watch_path: PathBuf,
    recursive: bool,
    filter: UploadFilter,
    /// Receives every matching path that was created or written to.
    file_tx: mpsc::Sender<PathBuf>,
}

/// File name globs that identify source videos.
struct UploadFilter {
    patterns: Vec<glob::Pattern>,
}

impl UploadFilter {
    fn new(patterns: &[String]) -> Result<Self, glob::PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.patterns.iter().any(|p| p.matches(name)))
    }
}

impl FolderWatcher {
    /// Creates a watcher. Fails if a pattern is not a valid glob.
    pub fn new(
        watch_path: PathBuf,
        recursive: bool,
        file_patterns: &[String],
        file_tx: mpsc::Sender<PathBuf>,
    ) -> Result<Self, WatcherError> {
        let filter = UploadFilter::new(file_patterns).map_err(|e| WatcherError::WatchFailed {
            path: watch_path.clone(),
            message: format!("Invalid file pattern: {}", e),
        })?;

        Ok(Self {
            watch_path,
            recursive,
            filter,
            file_tx,
        })
    }

    /// Registers the OS watch and forwards events from a background task,
    /// which keeps the watch alive for as long as the receiver exists.
    pub fn start(self) -> Result<(), WatcherError> {
        let (event_tx, event_rx) = mpsc::channel(256);

        // Runs on notify's own thread
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "Watch error"),
            },
            Config::default(),
        )?;

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&self.watch_path, mode)?;

        info!(path = ?self.watch_path, recursive = self.recursive, "Watching upload folder");

        tokio::spawn(async move {
            let _watcher = watcher;
            self.forward(event_rx).await;
        });

        Ok(())
    }

    /// Lists matching files already in the folder, sorted.
    pub fn scan_existing(&self) -> Vec<PathBuf> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.watch_path)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && self.filter.accepts(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        info!(count = files.len(), path = ?self.watch_path, "Found existing uploads");
        files
    }

    async fn forward(self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }

            for path in event.paths {
                if !path.is_file() || !self.filter.accepts(&path) {
                    continue;
                }
                debug!(?path, "Upload activity");
                if self.file_tx.send(path).await.is_err() {
                    warn!("Upload receiver dropped, stopping watcher");
                    return;
                }
            }
        }
        warn!(path = ?self.watch_path, "Watcher channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(root: &Path, recursive: bool) -> FolderWatcher {
        let (tx, _rx) = mpsc::channel(1);
        FolderWatcher::new(
            root.to_path_buf(),
            recursive,
            &["*.mp4".to_string(), "*.mov".to_string()],
            tx,
        )
        .unwrap()
    }

    #[test]
    fn scan_skips_encoder_output() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("abc/abc/v0")).unwrap();
        std::fs::write(tmp.path().join("abc/abc.mp4"), b"x").unwrap();
        std::fs::write(tmp.path().join("abc/abc/master.m3u8"), b"x").unwrap();
        std::fs::write(tmp.path().join("abc/abc/v0/fileSequence0.ts"), b"x").unwrap();
        std::fs::write(tmp.path().join("top.MOV"), b"x").unwrap();

        let found = watcher(tmp.path(), true).scan_existing();
        assert_eq!(found, vec![tmp.path().join("abc/abc.mp4")]);
    }

    #[test]
    fn non_recursive_scan_stays_at_top_level() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/a.mp4"), b"x").unwrap();
        std::fs::write(tmp.path().join("b.mov"), b"x").unwrap();

        let found = watcher(tmp.path(), false).scan_existing();
        assert_eq!(found, vec![tmp.path().join("b.mov")]);
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let result = FolderWatcher::new(PathBuf::from("/tmp"), true, &["[".to_string()], tx);
        assert!(matches!(result, Err(WatcherError::WatchFailed { .. })));
    }
}
