//! Enumeration and concurrent upload of a job's encoded output.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, UploadError};
use crate::storage::{content_type_for, Uploader};

const MASTER_PLAYLIST: &str = "master.m3u8";

/// What was uploaded for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Public URLs of every uploaded file, in file order.
    pub urls: Vec<String>,
    /// Public URL of the master playlist, if the output had one.
    pub playlist_url: Option<String>,
}

/// Lists every regular file under `dir`, depth-first, sorted by path.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| PipelineError::Enumerate {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Builds the object key for `file`, keeping its path relative to `root`.
///
/// `videos-hls` + `abc123` + `v0/seg0.ts` gives `videos-hls/abc123/v0/seg0.ts`.
pub fn destination_key(prefix: &str, name: &str, root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if prefix.is_empty() {
        format!("{}/{}", name, relative)
    } else {
        format!("{}/{}/{}", prefix, name, relative)
    }
}

/// Uploads every file under `root` concurrently.
///
/// Returns only after every upload has resolved. If any failed, the first
/// failure in file order is returned.
pub async fn upload_all(
    uploader: &dyn Uploader,
    prefix: &str,
    name: &str,
    root: &Path,
) -> Result<UploadSummary, PipelineError> {
    let files = collect_files(root)?;
    if files.is_empty() {
        return Err(PipelineError::NoOutput(root.to_path_buf()));
    }

    let uploads = files.iter().map(|file| {
        let key = destination_key(prefix, name, root, file);
        let content_type = content_type_for(file);
        async move {
            debug!(job = %name, %key, %content_type, "Uploading file");
            let result = uploader.upload(file, &key, &content_type).await;
            (file, result)
        }
    });

    let results = join_all(uploads).await;

    let mut summary = UploadSummary::default();
    let mut first_error: Option<UploadError> = None;

    for (file, result) in results {
        match result {
            Ok(url) => {
                if file.strip_prefix(root).ok() == Some(Path::new(MASTER_PLAYLIST)) {
                    summary.playlist_url = Some(url.clone());
                }
                summary.urls.push(url);
            }
            Err(e) => {
                warn!(job = %name, ?file, error = %e, "Upload failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::storage::MockUploader;

    fn hls_tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("v0")).unwrap();
        std::fs::write(tmp.path().join("master.m3u8"), "#EXTM3U").unwrap();
        std::fs::write(tmp.path().join("v0/prog_index.m3u8"), "#EXTM3U").unwrap();
        std::fs::write(tmp.path().join("v0/fileSequence0.ts"), [0u8; 188]).unwrap();
        tmp
    }

    #[test]
    fn keys_keep_relative_structure() {
        let root = Path::new("/work/abc123");
        assert_eq!(
            destination_key("videos-hls", "abc123", root, &root.join("v0/seg0.ts")),
            "videos-hls/abc123/v0/seg0.ts"
        );
        assert_eq!(
            destination_key("", "abc123", root, &root.join("master.m3u8")),
            "abc123/master.m3u8"
        );
    }

    #[test]
    fn collects_nested_regular_files() {
        let tmp = hls_tree();
        let files = collect_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.is_file()));
    }

    #[tokio::test]
    async fn uploads_every_file_with_its_content_type() {
        let tmp = hls_tree();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .withf(|_, key, ct| key == "videos-hls/abc/master.m3u8" && ct == "application/vnd.apple.mpegurl")
            .times(1)
            .returning(|_, key, _| Ok(format!("https://cdn/{}", key)));
        uploader
            .expect_upload()
            .withf(|_, key, _| key == "videos-hls/abc/v0/prog_index.m3u8")
            .times(1)
            .returning(|_, key, _| Ok(format!("https://cdn/{}", key)));
        uploader
            .expect_upload()
            .with(
                eq(tmp.path().join("v0/fileSequence0.ts")),
                eq("videos-hls/abc/v0/fileSequence0.ts"),
                eq("video/mp2t"),
            )
            .times(1)
            .returning(|_, key, _| Ok(format!("https://cdn/{}", key)));

        let summary = upload_all(&uploader, "videos-hls", "abc", tmp.path()).await.unwrap();

        assert_eq!(summary.urls.len(), 3);
        assert_eq!(
            summary.playlist_url.as_deref(),
            Some("https://cdn/videos-hls/abc/master.m3u8")
        );
    }

    #[tokio::test]
    async fn one_failed_upload_fails_the_batch_after_all_resolve() {
        let tmp = hls_tree();
        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .withf(|_, key, _| key.ends_with(".ts"))
            .times(1)
            .returning(|_, key, _| {
                Err(UploadError::PutFailed {
                    key: key.to_string(),
                    message: "access denied".to_string(),
                })
            });
        uploader
            .expect_upload()
            .withf(|_, key, _| key.ends_with(".m3u8"))
            .times(2)
            .returning(|_, key, _| Ok(key.to_string()));

        let err = upload_all(&uploader, "videos-hls", "abc", tmp.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upload(UploadError::PutFailed { .. })));
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let uploader = MockUploader::new();

        let err = upload_all(&uploader, "videos-hls", "abc", tmp.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoOutput(_)));
    }
}
