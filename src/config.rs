use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ConvertError, Result};
use crate::job::Quality;

/// Default settings file looked up in the current directory
pub const DEFAULT_SETTINGS_FILE: &str = "movconv.toml";

/// Directory holding logs and the conversion history
pub const DATA_DIR: &str = ".movconv";

fn default_preset() -> String {
    "medium".to_string()
}

fn default_max_bitrate() -> String {
    "10M".to_string()
}

fn default_buffer_size() -> String {
    "16M".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_history_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("conversion_history.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub conversion: ConversionSettings,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub general: GeneralSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Output quality: high, medium or low
    #[serde(default)]
    pub quality: Quality,
    /// x264 speed preset (ultrafast ... veryslow)
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Passed to -maxrate, e.g. "10M"
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: String,
    /// Passed to -bufsize, e.g. "16M"
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Keep the audio track; when false audio is dropped from the output
    #[serde(default = "default_true")]
    pub preserve_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Open the containing folder after a successful conversion
    #[serde(default = "default_true")]
    pub auto_open_folder: bool,
    #[serde(default)]
    pub dark_mode: bool,
    /// Where the conversion history is stored
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            preset: default_preset(),
            max_bitrate: default_max_bitrate(),
            buffer_size: default_buffer_size(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            preserve_audio: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            auto_open_folder: true,
            dark_mode: false,
            history_path: default_history_path(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conversion: ConversionSettings::default(),
            media: MediaConfig::default(),
            general: GeneralSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Config(format!("Failed to read settings file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ConvertError::Config(format!("Failed to parse settings file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConvertError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConvertError::Config(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Load settings, falling back to defaults when the file is missing or unreadable
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }

        match Self::from_file(path) {
            Ok(settings) => {
                info!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("Could not load settings from {}, using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
