//! FFmpeg subprocess wrapper producing a multi-variant HLS ladder.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::Transcoder;
use crate::config::model::{Rendition, TranscoderConfig};
use crate::error::TranscodeError;
use crate::media::probe::{self, ProbeResult, VideoStream};
use crate::status::derive_job_name;

const MASTER_PLAYLIST: &str = "master.m3u8";
const FALLBACK_SOURCE_BITRATE: &str = "5000k";

/// One output variant of the HLS ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Output height in pixels.
    pub height: u32,
    /// Target video bitrate.
    pub video_bitrate: String,
}

/// Encodes sources into `master.m3u8` plus `v{N}/prog_index.m3u8` and
/// `v{N}/fileSequence{K}.ts` per variant.
#[derive(Debug, Clone)]
pub struct FfmpegHlsTranscoder {
    config: TranscoderConfig,
}

impl FfmpegHlsTranscoder {
    /// Creates a transcoder from the transcoding settings.
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Returns a fresh directory for one encode of `source`:
    /// `{output_root or source parent}/{name}-hls-{suffix}`.
    ///
    /// Every call yields a different path, so an earlier attempt with the same
    /// name never contributes files to this one.
    pub fn output_dir_for(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        let name = derive_job_name(source)
            .ok_or_else(|| TranscodeError::SourceMissing(source.to_path_buf()))?;

        let root = match &self.config.output_root {
            Some(root) => root.clone(),
            None => source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let suffix = Uuid::new_v4().simple().to_string();
        Ok(root.join(format!("{}-hls-{}", name, &suffix[..12])))
    }
}

#[async_trait]
impl Transcoder for FfmpegHlsTranscoder {
    async fn encode(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        if !source.is_file() {
            return Err(TranscodeError::SourceMissing(source.to_path_buf()));
        }

        let probe_result = probe::probe(&self.config.ffprobe_path, source).await?;
        let video = probe_result
            .primary_video()
            .ok_or_else(|| TranscodeError::NoVideoStream(source.to_path_buf()))?;

        let variants = plan_variants(video, &probe_result, &self.config.renditions);

        let output_dir = self.output_dir_for(source)?;
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| TranscodeError::OutputDir {
                path: output_dir.clone(),
                source: e,
            })?;

        let args = build_hls_args(
            &self.config,
            source,
            &output_dir,
            &variants,
            probe_result.has_audio(),
        );

        info!(
            ?source,
            output = ?output_dir,
            variants = variants.len(),
            source_height = video.height,
            "Starting HLS encode"
        );

        let mut cmd = Command::new(&self.config.ffmpeg_path);
        // A timed-out job drops this future; take ffmpeg down with it
        cmd.args(&args).kill_on_drop(true);
        debug!(cmd = ?cmd, "Running FFmpeg for HLS");

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TranscodeError::SpawnFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::FfmpegFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: tail(&stderr, 2000).to_string(),
            });
        }

        info!(?source, "HLS encode completed");
        Ok(output_dir)
    }
}

/// Chooses the ladder: every rendition strictly below the source height,
/// lowest first, then one variant at the source resolution.
pub fn plan_variants(
    video: &VideoStream,
    probe_result: &ProbeResult,
    renditions: &[Rendition],
) -> Vec<Variant> {
    let mut scaled: Vec<&Rendition> = renditions
        .iter()
        .filter(|r| r.height < video.height)
        .collect();
    scaled.sort_by_key(|r| r.height);
    scaled.dedup_by_key(|r| r.height);

    let mut variants: Vec<Variant> = scaled
        .into_iter()
        .map(|r| Variant {
            height: r.height,
            video_bitrate: r.video_bitrate.clone(),
        })
        .collect();

    let source_bitrate = video
        .bitrate
        .or(Some(probe_result.info.bitrate).filter(|b| *b > 0))
        .map(|bps| format!("{}k", (bps / 1000).max(1)))
        .unwrap_or_else(|| FALLBACK_SOURCE_BITRATE.to_string());

    variants.push(Variant {
        // libx264 needs even dimensions
        height: video.height - video.height % 2,
        video_bitrate: source_bitrate,
    });

    variants
}

/// Builds the ffmpeg argument list for an HLS encode.
pub fn build_hls_args(
    config: &TranscoderConfig,
    source: &Path,
    output_dir: &Path,
    variants: &[Variant],
    has_audio: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), source.into()];

    for _ in variants {
        push_pair(&mut args, "-map", "0:v:0");
        if has_audio {
            push_pair(&mut args, "-map", "0:a:0");
        }
    }

    for (i, variant) in variants.iter().enumerate() {
        args.push(format!("-filter:v:{}", i).into());
        args.push(format!("scale=-2:{}", variant.height).into());
        args.push(format!("-c:v:{}", i).into());
        args.push("libx264".into());
        args.push(format!("-b:v:{}", i).into());
        args.push(variant.video_bitrate.as_str().into());
    }

    push_pair(&mut args, "-preset", config.preset.as_str());

    if has_audio {
        push_pair(&mut args, "-c:a", "aac");
        push_pair(&mut args, "-b:a", config.audio_bitrate.as_str());
    }

    let stream_map = (0..variants.len())
        .map(|i| {
            if has_audio {
                format!("v:{},a:{}", i, i)
            } else {
                format!("v:{}", i)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    push_pair(&mut args, "-f", "hls");
    push_pair(&mut args, "-hls_time", config.hls_time.to_string());
    push_pair(&mut args, "-hls_list_size", "0");
    push_pair(&mut args, "-hls_playlist_type", "vod");
    args.push("-hls_segment_filename".into());
    args.push(output_dir.join("v%v").join("fileSequence%d.ts").into_os_string());
    push_pair(&mut args, "-master_pl_name", MASTER_PLAYLIST);
    push_pair(&mut args, "-var_stream_map", stream_map);
    args.push(output_dir.join("v%v").join("prog_index.m3u8").into_os_string());

    args
}

fn push_pair(args: &mut Vec<OsString>, flag: &str, value: impl Into<OsString>) {
    args.push(flag.into());
    args.push(value.into());
}

/// Returns at most the last `max` bytes of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaInfo;

    fn probe_of(height: u32, bitrate: Option<u64>) -> ProbeResult {
        ProbeResult {
            info: MediaInfo {
                format: "mov,mp4".to_string(),
                duration: 10.0,
                size: 1_000_000,
                bitrate: 0,
            },
            video_streams: vec![VideoStream {
                index: 0,
                codec: "h264".to_string(),
                width: height * 16 / 9,
                height,
                bitrate,
            }],
            audio_stream_count: 1,
        }
    }

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn ladder_stops_below_source_height() {
        let probe_result = probe_of(1080, Some(4_500_000));
        let renditions = TranscoderConfig::default().renditions;

        let variants = plan_variants(probe_result.primary_video().unwrap(), &probe_result, &renditions);

        assert_eq!(
            variants,
            vec![
                Variant { height: 720, video_bitrate: "2800k".to_string() },
                Variant { height: 1080, video_bitrate: "4500k".to_string() },
            ]
        );
    }

    #[test]
    fn small_sources_get_a_single_variant() {
        let probe_result = probe_of(481, None);
        let renditions = TranscoderConfig::default().renditions;

        let variants = plan_variants(probe_result.primary_video().unwrap(), &probe_result, &renditions);

        assert_eq!(
            variants,
            vec![Variant { height: 480, video_bitrate: FALLBACK_SOURCE_BITRATE.to_string() }]
        );
    }

    #[test]
    fn args_map_every_variant_with_audio() {
        let config = TranscoderConfig::default();
        let variants = vec![
            Variant { height: 720, video_bitrate: "2800k".to_string() },
            Variant { height: 1080, video_bitrate: "4500k".to_string() },
        ];

        let args = args_as_strings(&build_hls_args(
            &config,
            Path::new("/uploads/abc/abc.mp4"),
            Path::new("/uploads/abc/abc"),
            &variants,
            true,
        ));

        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 4);
        let map_pos = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert_eq!(args[map_pos + 1], "v:0,a:0 v:1,a:1");
        assert!(args.contains(&"scale=-2:1080".to_string()));
        assert_eq!(args.last().unwrap(), "/uploads/abc/abc/v%v/prog_index.m3u8");
    }

    #[test]
    fn args_skip_audio_when_source_is_silent() {
        let config = TranscoderConfig::default();
        let variants = vec![Variant { height: 720, video_bitrate: "2800k".to_string() }];

        let args = args_as_strings(&build_hls_args(
            &config,
            Path::new("in.mp4"),
            Path::new("out"),
            &variants,
            false,
        ));

        assert!(!args.contains(&"0:a:0".to_string()));
        assert!(!args.contains(&"aac".to_string()));
        let map_pos = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert_eq!(args[map_pos + 1], "v:0");
    }

    fn dir_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn output_dir_defaults_to_source_directory() {
        let transcoder = FfmpegHlsTranscoder::new(TranscoderConfig::default());
        let dir = transcoder.output_dir_for(Path::new("/uploads/videos/abc123.mp4")).unwrap();
        assert_eq!(dir.parent(), Some(Path::new("/uploads/videos")));
        assert!(dir_name(&dir).starts_with("abc123-hls-"));

        let transcoder = FfmpegHlsTranscoder::new(TranscoderConfig {
            output_root: Some(PathBuf::from("/scratch")),
            ..TranscoderConfig::default()
        });
        let dir = transcoder.output_dir_for(Path::new("/uploads/videos/abc123.mp4")).unwrap();
        assert_eq!(dir.parent(), Some(Path::new("/scratch")));
        assert!(dir_name(&dir).starts_with("abc123-hls-"));
    }

    #[test]
    fn repeated_names_get_separate_output_dirs() {
        let transcoder = FfmpegHlsTranscoder::new(TranscoderConfig::default());
        let first = transcoder.output_dir_for(Path::new("/uploads/abc.mp4")).unwrap();
        let second = transcoder.output_dir_for(Path::new("/uploads/abc.mov")).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn extensionless_source_is_not_its_own_output_dir() {
        let transcoder = FfmpegHlsTranscoder::new(TranscoderConfig::default());
        let source = Path::new("/uploads/abc");
        let dir = transcoder.output_dir_for(source).unwrap();
        assert_ne!(dir, source);
        assert!(!source.starts_with(&dir));
    }

    #[tokio::test]
    async fn missing_source_fails_before_spawning() {
        let transcoder = FfmpegHlsTranscoder::new(TranscoderConfig::default());
        let err = transcoder
            .encode(Path::new("/nonexistent/abc123.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::SourceMissing(_)));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }
}
