//! In-process encoding queue.

pub mod encoding;
pub mod upload;

pub use encoding::{EncodingQueue, JobEvent, QueueSettings};
pub use upload::UploadSummary;
