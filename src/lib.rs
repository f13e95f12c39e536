//! HLS Encode Queue - a single-worker queue that transcodes uploaded videos
//! into HLS and publishes them to S3-compatible object storage.
//!
//! Uploads are picked up from a watched directory (or submitted directly),
//! encoded one at a time in arrival order, uploaded, and cleaned up. Every
//! job's progress is recorded in Redis.

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod media;
pub mod notify;
pub mod queue;
pub mod status;
pub mod storage;
pub mod validation;
pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, EncodeArgs, RunArgs};
use crate::config::AppConfig;
use crate::encoder::FfmpegHlsTranscoder;
use crate::error::AppError;
use crate::notify::{Metrics, MetricsServer};
use crate::queue::{EncodingQueue, QueueSettings};
use crate::status::{EncodingJob, EncodingStatus, RedisStatusStore, StatusStore};
use crate::storage::S3Uploader;
use crate::watcher::WatcherManager;

/// Runs the encode queue with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Run(args) => run_daemon(args, &cli.config).await,
        Commands::Encode(args) => encode_files(args, &cli.config).await,
        Commands::Status { name, history } => show_status(&cli.config, &name, history).await,
        Commands::ConfigValidate => validate_config(&cli.config).await,
        Commands::ConfigShow => show_config(&cli.config).await,
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Connects the status store, transcoder and uploader into a queue.
async fn build_queue(
    config: &AppConfig,
    metrics: Option<Arc<Metrics>>,
) -> Result<EncodingQueue, AppError> {
    let store = RedisStatusStore::new(&config.global.redis.url()).await?;
    info!("Connected to Redis");

    let uploader = S3Uploader::new(&config.global.storage)?;
    let transcoder = FfmpegHlsTranscoder::new(config.global.transcoder.clone());

    let settings = QueueSettings {
        key_prefix: config.global.storage.key_prefix.clone(),
        job_timeout: config.global.queue.job_timeout(),
    };

    let queue = match metrics {
        Some(metrics) => EncodingQueue::with_metrics(
            Arc::new(store),
            Arc::new(transcoder),
            Arc::new(uploader),
            settings,
            metrics,
        ),
        None => EncodingQueue::new(
            Arc::new(store),
            Arc::new(transcoder),
            Arc::new(uploader),
            settings,
        ),
    };

    Ok(queue)
}

/// Runs the queue behind the upload directory watcher until Ctrl+C.
async fn run_daemon(args: RunArgs, config_path: &Path) -> Result<()> {
    info!("Starting encode queue");

    let config = config::load_and_validate(config_path)?;
    info!("Configuration loaded and validated");

    let metrics = Arc::new(Metrics::new()?);

    if config.global.prometheus.enabled {
        let port = config.global.prometheus.port;
        let metrics_server = MetricsServer::new(metrics.clone(), port);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.start().await {
                error!(error = %e, "Prometheus server failed");
            }
        });
        info!(port, "Prometheus metrics server started");
    }

    let queue = build_queue(&config, Some(metrics)).await?;

    if config.watch.enabled {
        let stability = &config.global.stability_check;
        let mut watcher_manager = WatcherManager::new(
            config.global.upload_dir.clone(),
            config.watch.clone(),
            queue.clone(),
            Duration::from_secs(stability.duration_seconds),
            Duration::from_secs(stability.poll_interval_seconds),
        );
        let process_existing = args.process_existing;

        tokio::spawn(async move {
            if let Err(e) = watcher_manager.start(process_existing).await {
                error!(error = %e, "Upload watcher failed");
            }
        });
    } else {
        warn!("Upload watching is disabled; nothing will be queued");
    }

    info!("Encode queue is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!(
        pending = queue.pending_len(),
        running = queue.is_running(),
        "Shutdown signal received"
    );
    Ok(())
}

/// Encodes the given files in order and reports how each one ended.
async fn encode_files(args: EncodeArgs, config_path: &Path) -> Result<()> {
    let config = config::load_and_validate(config_path)?;
    let queue = build_queue(&config, None).await?;

    let mut submitted = Vec::with_capacity(args.paths.len());
    for path in args.paths {
        let path = absolute(path)?;
        let job = queue
            .enqueue(path.clone())
            .await
            .with_context(|| format!("submitting {}", path.display()))?;
        submitted.push(job);
    }

    queue.wait_idle().await;

    let outcomes = final_records(&queue, &submitted).await?;
    let mut failed = 0;
    for (job, outcome) in submitted.iter().zip(&outcomes) {
        match outcome {
            Some(record) => {
                if record.status != EncodingStatus::Success {
                    failed += 1;
                }
                print_job(record);
            }
            None => {
                failed += 1;
                println!("{} [{}]: no status recorded", job.name, job.id);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} job(s) did not succeed", failed, submitted.len());
    }
    Ok(())
}

/// Looks up the current record of each submission by id, in submission order.
async fn final_records(
    queue: &EncodingQueue,
    submitted: &[EncodingJob],
) -> Result<Vec<Option<EncodingJob>>> {
    let mut records = Vec::with_capacity(submitted.len());
    for job in submitted {
        let history = queue.history(&job.name).await?;
        records.push(history.into_iter().find(|record| record.id == job.id));
    }
    Ok(records)
}

/// Prints the recorded status of a job.
async fn show_status(config_path: &Path, name: &str, history: bool) -> Result<()> {
    let config = config::load_from_path(config_path)?;
    let store = RedisStatusStore::new(&config.global.redis.url())
        .await
        .context("connecting to Redis")?;

    let jobs = if history {
        store.history(name).await?
    } else {
        store.find_by_name(name).await?.into_iter().collect()
    };

    if jobs.is_empty() {
        println!("No status recorded for {}.", name);
    }
    for job in &jobs {
        print_job(job);
    }

    Ok(())
}

fn print_job(job: &EncodingJob) {
    match &job.message {
        Some(message) => println!(
            "{} [{}] {} (updated {}): {}",
            job.name, job.id, job.status, job.updated_at, message
        ),
        None => println!(
            "{} [{}] {} (updated {})",
            job.name, job.id, job.status, job.updated_at
        ),
    }
}

/// Resolves a command-line path against the working directory.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(cwd.join(path))
}

/// Validates the configuration file and reports any issues.
async fn validate_config(config_path: &Path) -> Result<()> {
    let config = config::load_and_validate(config_path)?;

    println!("Configuration is valid.");
    println!("Upload directory: {}", config.global.upload_dir.display());
    println!(
        "Destination: s3://{}/{}",
        config.global.storage.bucket, config.global.storage.key_prefix
    );
    println!("Renditions:");
    for rendition in &config.global.transcoder.renditions {
        println!("  - {}p @ {}", rendition.height, rendition.video_bitrate);
    }

    Ok(())
}

/// Displays the parsed configuration.
async fn show_config(config_path: &Path) -> Result<()> {
    let config = config::load_and_validate(config_path)?;
    let yaml = serde_yaml::to_string(&config)?;
    println!("{}", yaml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::MockTranscoder;
    use crate::error::TranscodeError;
    use crate::status::MemoryStatusStore;
    use crate::storage::MockUploader;

    #[tokio::test]
    async fn same_named_submissions_report_their_own_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let encoded = tmp.path().join("x-hls");
        std::fs::create_dir_all(&encoded).unwrap();
        std::fs::write(encoded.join("master.m3u8"), "#EXTM3U").unwrap();

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_encode()
            .withf(|source| source.starts_with("/a"))
            .returning(|source| Err(TranscodeError::NoVideoStream(source.to_path_buf())));
        transcoder
            .expect_encode()
            .withf(|source| source.starts_with("/b"))
            .returning(move |_| Ok(encoded.clone()));

        let mut uploader = MockUploader::new();
        uploader
            .expect_upload()
            .returning(|_, key, _| Ok(format!("https://cdn/{}", key)));

        let queue = EncodingQueue::new(
            Arc::new(MemoryStatusStore::new()),
            Arc::new(transcoder),
            Arc::new(uploader),
            QueueSettings::default(),
        );

        let first = queue.enqueue("/a/x.mp4").await.unwrap();
        let second = queue.enqueue("/b/x.mp4").await.unwrap();
        queue.wait_idle().await;

        let records = final_records(&queue, &[first.clone(), second.clone()]).await.unwrap();
        let statuses: Vec<_> = records
            .iter()
            .map(|record| record.as_ref().map(|r| (r.id.clone(), r.status)))
            .collect();
        assert_eq!(
            statuses,
            vec![
                Some((first.id, EncodingStatus::Failed)),
                Some((second.id, EncodingStatus::Success)),
            ]
        );
    }
}
