//! Media analysis using ffprobe.

pub mod probe;

pub use probe::{MediaInfo, ProbeResult, VideoStream};
