use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ConversionSettings, Settings};
use crate::error::Result;
use crate::job::Quality;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Settings file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-run encoder overrides on top of the saved settings
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct EncodeOverrides {
    /// Quality level: high, medium, low
    #[arg(short, long)]
    pub quality: Option<String>,

    /// x264 speed preset (e.g. fast, medium, slow)
    #[arg(long)]
    pub preset: Option<String>,

    /// Drop the audio track
    #[arg(long)]
    pub no_audio: bool,

    /// Audio bitrate (e.g. 128k)
    #[arg(long)]
    pub audio_bitrate: Option<String>,

    /// Audio codec (e.g. aac)
    #[arg(long)]
    pub audio_codec: Option<String>,

    /// Maximum video bitrate (e.g. 10M)
    #[arg(long)]
    pub max_bitrate: Option<String>,

    /// Rate control buffer size (e.g. 16M)
    #[arg(long)]
    pub buffer_size: Option<String>,
}

impl EncodeOverrides {
    /// Apply the given options on top of `conversion`
    pub fn apply(&self, conversion: &mut ConversionSettings) -> Result<()> {
        if let Some(quality) = &self.quality {
            conversion.quality = quality.parse::<Quality>()?;
        }
        if let Some(preset) = &self.preset {
            conversion.preset = preset.clone();
        }
        if let Some(audio_codec) = &self.audio_codec {
            conversion.audio_codec = audio_codec.clone();
        }
        if let Some(audio_bitrate) = &self.audio_bitrate {
            conversion.audio_bitrate = audio_bitrate.clone();
        }
        if let Some(max_bitrate) = &self.max_bitrate {
            conversion.max_bitrate = max_bitrate.clone();
        }
        if let Some(buffer_size) = &self.buffer_size {
            conversion.buffer_size = buffer_size.clone();
        }
        if self.no_audio {
            conversion.preserve_audio = false;
        }
        Ok(())
    }
}

/// Changes written by `settings save`
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SettingsChanges {
    #[command(flatten)]
    pub encode: EncodeOverrides,

    /// Keep the audio track (true/false)
    #[arg(long)]
    pub preserve_audio: Option<bool>,

    /// Open the output folder after a successful conversion (true/false)
    #[arg(long)]
    pub auto_open_folder: Option<bool>,

    /// Use the dark progress bar colors (true/false)
    #[arg(long)]
    pub dark_mode: Option<bool>,
}

impl SettingsChanges {
    pub fn apply(&self, settings: &mut Settings) -> Result<()> {
        self.encode.apply(&mut settings.conversion)?;
        if let Some(preserve_audio) = self.preserve_audio {
            settings.conversion.preserve_audio = preserve_audio;
        }
        if let Some(auto_open_folder) = self.auto_open_folder {
            settings.general.auto_open_folder = auto_open_folder;
        }
        if let Some(dark_mode) = self.dark_mode {
            settings.general.dark_mode = dark_mode;
        }
        Ok(())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single video file to MOV
    Convert {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to the input with a .mov extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace the output file if it already exists
        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        encode: EncodeOverrides,
    },

    /// Convert several video files into one output directory
    Batch {
        /// Input video files
        #[arg(short, long = "input", num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Add every supported video directly inside this directory
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Output directory for converted files
        #[arg(short, long)]
        output_dir: PathBuf,

        #[command(flatten)]
        encode: EncodeOverrides,
    },

    /// Show container and stream details of a video file
    Probe {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check that ffmpeg and ffprobe are available
    Check,

    /// Manage conversion history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List recorded conversions, most recent first
    List {
        /// Show at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete the history file
    Clear,

    /// Print the history file location
    Path,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the effective settings
    Show,

    /// Write settings to the settings file, applying any given changes
    Save {
        #[command(flatten)]
        changes: SettingsChanges,
    },

    /// Reset the settings file to defaults
    Reset,
}
