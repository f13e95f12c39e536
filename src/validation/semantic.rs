//! Semantic validation for configuration values.

use std::collections::HashSet;

use crate::config::model::{AppConfig, GlobalConfig, TranscoderConfig};

use super::{ValidationIssue, ValidationReport};

/// Validates semantic correctness of configuration values.
pub fn validate(config: &AppConfig) -> ValidationReport {
    let mut result = ValidationReport::new();

    validate_global(&config.global, &mut result);
    validate_transcoder(&config.global.transcoder, &mut result);

    for (i, pattern) in config.watch.file_patterns.iter().enumerate() {
        if let Err(e) = glob::Pattern::new(pattern) {
            result.push(ValidationIssue::error(
                format!("watch.file_patterns[{}]", i),
                format!("Invalid glob pattern '{}': {}", pattern, e),
            ));
        } else if pattern.ends_with(".ts") || pattern.ends_with(".m3u8") {
            result.push(
                ValidationIssue::warning(
                    format!("watch.file_patterns[{}]", i),
                    format!("Pattern '{}' matches encoder output", pattern),
                )
                .with_suggestion("Match source containers such as *.mp4 or *.mov"),
            );
        }
    }

    if config.watch.enabled && config.watch.file_patterns.is_empty() {
        result.push(ValidationIssue::warning(
            "watch.file_patterns",
            "Watching is enabled but no patterns are configured",
        ));
    }

    result
}

fn validate_global(global: &GlobalConfig, result: &mut ValidationReport) {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&global.log_level.as_str()) {
        result.push(
            ValidationIssue::error("global.log_level", format!("Invalid log level: '{}'", global.log_level))
                .with_suggestion(format!("Valid levels: {}", valid_levels.join(", "))),
        );
    }

    if global.redis.port == 0 {
        result.push(ValidationIssue::error(
            "global.redis.port",
            "Redis port cannot be 0",
        ));
    }

    if global.storage.bucket.trim().is_empty() {
        result.push(ValidationIssue::error(
            "global.storage.bucket",
            "Bucket name cannot be empty",
        ));
    }

    if global.storage.key_prefix.starts_with('/') || global.storage.key_prefix.ends_with('/') {
        result.push(
            ValidationIssue::error(
                "global.storage.key_prefix",
                format!("Key prefix '{}' has a leading or trailing '/'", global.storage.key_prefix),
            )
            .with_suggestion("Use a bare prefix such as 'videos-hls'"),
        );
    }

    if global.queue.job_timeout_seconds == Some(0) {
        result.push(
            ValidationIssue::error("global.queue.job_timeout_seconds", "Job timeout cannot be 0")
                .with_suggestion("Remove the setting to disable the timeout"),
        );
    }

    if global.stability_check.duration_seconds == 0 {
        result.push(ValidationIssue::error(
            "global.stability_check.duration_seconds",
            "Stability duration must be at least 1 second",
        ));
    }

    if global.stability_check.poll_interval_seconds == 0 {
        result.push(ValidationIssue::error(
            "global.stability_check.poll_interval_seconds",
            "Poll interval must be at least 1 second",
        ));
    }

    if global.prometheus.enabled && global.prometheus.port == 0 {
        result.push(ValidationIssue::error(
            "global.prometheus.port",
            "Prometheus port cannot be 0 when enabled",
        ));
    }
}

fn validate_transcoder(transcoder: &TranscoderConfig, result: &mut ValidationReport) {
    if transcoder.hls_time == 0 {
        result.push(ValidationIssue::error(
            "global.transcoder.hls_time",
            "Segment duration must be at least 1 second",
        ));
    }

    let mut seen_heights = HashSet::new();
    for (i, rendition) in transcoder.renditions.iter().enumerate() {
        let prefix = format!("global.transcoder.renditions[{}]", i);

        if rendition.height == 0 || rendition.height % 2 != 0 {
            result.push(
                ValidationIssue::error(
                    format!("{}.height", prefix),
                    format!("Height {} is not a positive even number", rendition.height),
                )
                .with_suggestion("libx264 requires even frame dimensions"),
            );
        }

        if !seen_heights.insert(rendition.height) {
            result.push(ValidationIssue::warning(
                format!("{}.height", prefix),
                format!("Duplicate rendition height {}", rendition.height),
            ));
        }

        if !is_bitrate(&rendition.video_bitrate) {
            result.push(
                ValidationIssue::error(
                    format!("{}.video_bitrate", prefix),
                    format!("Invalid bitrate '{}'", rendition.video_bitrate),
                )
                .with_suggestion("Use a number with an optional k or M suffix, e.g. 2800k"),
            );
        }
    }

    if !is_bitrate(&transcoder.audio_bitrate) {
        result.push(ValidationIssue::error(
            "global.transcoder.audio_bitrate",
            format!("Invalid bitrate '{}'", transcoder.audio_bitrate),
        ));
    }
}

/// Returns true for ffmpeg bitrate strings such as `128k`, `5M`, or `800000`.
fn is_bitrate(value: &str) -> bool {
    let digits = value
        .strip_suffix(['k', 'K', 'm', 'M'])
        .unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
