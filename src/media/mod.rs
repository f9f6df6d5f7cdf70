// Media tool integration
//
// - Commands: argument-list builders for ffmpeg and ffprobe
// - Process: child process supervision with streamed stderr
// - Probe: ffprobe JSON parsing
// - Processor: availability checks and probing on top of the above

pub mod commands;
pub mod probe;
pub mod process;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use probe::*;
pub use process::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;

/// Informational operations on the external media tools
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Check that ffmpeg and ffprobe can be executed
    async fn check_availability(&self) -> Result<()>;

    /// First line of `ffmpeg -version`
    async fn get_version_info(&self) -> Result<String>;

    /// Inspect container and stream metadata for display
    async fn probe(&self, input_path: &Path) -> Result<MediaInfo>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }

    /// Create the child-process supervisor used for conversions
    pub fn create_runner() -> Box<dyn ProcessRunner> {
        Box::new(process::ChildProcessRunner)
    }
}
