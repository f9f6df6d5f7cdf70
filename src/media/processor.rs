use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use super::{MediaCommandBuilder, MediaInfo, MediaProcessorTrait, parse_probe_output};
use crate::config::MediaConfig;
use crate::error::{ConvertError, Result};

/// ffmpeg/ffprobe backed implementation of the media tools
pub struct MediaProcessorImpl {
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);
        Self { command_builder }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn check_availability(&self) -> Result<()> {
        self.command_builder
            .version_check()
            .execute_capture()
            .await
            .map_err(|e| ConvertError::Media(format!("FFmpeg not found: {}", e)))?;

        self.command_builder
            .probe_version_check()
            .execute_capture()
            .await
            .map_err(|e| ConvertError::Media(format!("FFprobe not found: {}", e)))?;

        info!("FFmpeg and FFprobe are available");
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let stdout = self.command_builder.version_check().execute_capture().await?;
        // The first line carries the version
        Ok(stdout.lines().next().unwrap_or("Unknown version").to_string())
    }

    async fn probe(&self, input_path: &Path) -> Result<MediaInfo> {
        info!("Probing {}", input_path.display());

        let stdout = self.command_builder.probe(input_path).execute_capture().await?;
        parse_probe_output(&stdout)
    }
}
