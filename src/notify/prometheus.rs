//! Prometheus metrics exporter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use tracing::{error, info};

use crate::error::NotificationError;

/// Prometheus metrics for the encoding queue.
pub struct Metrics {
    /// Registry for all metrics.
    registry: Registry,
    /// Number of jobs waiting in the queue.
    pub queue_depth: Gauge,
    /// Total jobs by terminal status.
    pub encodes_total: CounterVec,
    /// Transcode plus upload duration in seconds.
    pub encode_duration_seconds: Histogram,
    /// Total files uploaded to object storage.
    pub uploaded_files_total: Counter,
    /// Jobs currently in the pipeline (0 or 1).
    pub jobs_in_progress: Gauge,
}

impl Metrics {
    /// Creates and registers every metric.
    pub fn new() -> Result<Self, NotificationError> {
        let registry = Registry::new();

        let queue_depth = register(
            &registry,
            Gauge::new("encode_queue_depth", "Jobs waiting behind the running one"),
        )?;
        let encodes_total = register(
            &registry,
            CounterVec::new(
                Opts::new("encodes_total", "Finished encode jobs by outcome"),
                &["status"],
            ),
        )?;
        let encode_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "encode_duration_seconds",
                    "Wall time from pickup to terminal status for successful jobs",
                )
                .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
            ),
        )?;
        let uploaded_files_total = register(
            &registry,
            Counter::new("encode_uploaded_files_total", "Objects written to storage"),
        )?;
        let jobs_in_progress = register(
            &registry,
            Gauge::new("encode_jobs_in_progress", "Jobs inside the pipeline"),
        )?;

        Ok(Self {
            registry,
            queue_depth,
            encodes_total,
            encode_duration_seconds,
            uploaded_files_total,
            jobs_in_progress,
        })
    }

    /// Records a successful job.
    pub fn record_success(&self, elapsed: Duration, files: usize) {
        self.encodes_total.with_label_values(&["success"]).inc();
        self.encode_duration_seconds.observe(elapsed.as_secs_f64());
        self.uploaded_files_total.inc_by(files as f64);
    }

    /// Records a failed job.
    pub fn record_failure(&self) {
        self.encodes_total.with_label_values(&["failure"]).inc();
    }

    /// Updates queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    /// Updates jobs in progress gauge.
    pub fn set_jobs_in_progress(&self, count: usize) {
        self.jobs_in_progress.set(count as f64);
    }

    /// Returns the metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String, NotificationError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).map_err(prom_err)?;
        String::from_utf8(buffer).map_err(prom_err)
    }
}

/// Registers a freshly built collector and hands back a handle to it.
fn register<C>(
    registry: &Registry,
    collector: prometheus::Result<C>,
) -> Result<C, NotificationError>
where
    C: Collector + Clone + 'static,
{
    let collector = collector.map_err(prom_err)?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(prom_err)?;
    Ok(collector)
}

fn prom_err(e: impl std::fmt::Display) -> NotificationError {
    NotificationError::PrometheusFailed(e.to_string())
}

/// HTTP server for Prometheus metrics.
pub struct MetricsServer {
    /// Metrics instance.
    metrics: Arc<Metrics>,
    /// Port to listen on.
    port: u16,
}

impl MetricsServer {
    /// Creates a new metrics server.
    pub fn new(metrics: Arc<Metrics>, port: u16) -> Self {
        Self { metrics, port }
    }

    /// Starts the metrics HTTP server.
    pub async fn start(self) -> Result<(), NotificationError> {
        use http_body_util::Full;
        use hyper::body::Bytes;
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper::{body::Incoming, Request, Response, StatusCode};
        use hyper_util::rt::TokioIo;

        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(prom_err)?;

        info!(port = self.port, "Starting Prometheus metrics server");

        loop {
            let (stream, _) = listener.accept().await.map_err(prom_err)?;

            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| {
                    let metrics = metrics.clone();
                    async move {
                        let (status, body) = if req.uri().path() != "/metrics" {
                            (StatusCode::NOT_FOUND, "Not Found".to_string())
                        } else {
                            match metrics.gather() {
                                Ok(body) => (StatusCode::OK, body),
                                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                            }
                        };

                        let mut response = Response::new(Full::new(Bytes::from(body)));
                        *response.status_mut() = status;
                        Ok::<_, hyper::Error>(response)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(error = %e, "Error serving connection");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.set_queue_depth(3);
        metrics.record_success(Duration::from_secs(42), 7);
        metrics.record_failure();

        let text = metrics.gather().unwrap();
        assert!(text.contains("encode_queue_depth 3"));
        assert!(text.contains("encodes_total{status=\"success\"} 1"));
        assert!(text.contains("encodes_total{status=\"failure\"} 1"));
        assert!(text.contains("encode_uploaded_files_total 7"));
    }
}
