//! Recitation audio: downloading, ffmpeg plumbing, silence and onsets.

mod download;
pub mod ffmpeg;
pub mod onset;
pub mod silence;

pub use download::{Downloader, DownloadOptions};
pub use silence::Silence;

use std::path::PathBuf;
use std::time::Duration;

/// Audio covering exactly one ayah. `path` is `None` when the segment was
/// apportioned from a longer recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub ayah_number: u32,
    pub path: Option<PathBuf>,
    pub duration: Duration,
}
