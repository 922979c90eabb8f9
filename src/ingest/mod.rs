//! Frame ingestion sources.
//!
//! - Synthetic source (`stub://name`, optionally `stub://name?frames=N`)
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! Sources deliver frames already resized to the configured capture
//! resolution. `next_frame` returning `Ok(None)` means the source is exhausted.

use anyhow::Result;

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource};

/// Frame statistics for a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

pub trait FrameSource {
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame; `None` once the source has no more frames.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}
