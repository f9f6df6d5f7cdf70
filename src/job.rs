use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::ConversionSettings;
use crate::error::ConvertError;

/// Extension of every converted file
pub const OUTPUT_EXTENSION: &str = "mov";

/// Marker stored in place of an output size when no output exists
pub const SIZE_NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    /// Constant rate factor handed to the encoder
    pub fn crf(self) -> u8 {
        match self {
            Quality::High => 18,
            Quality::Medium => 23,
            Quality::Low => 28,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Quality::High),
            "medium" => Ok(Quality::Medium),
            "low" => Ok(Quality::Low),
            _ => Err(ConvertError::Config(format!(
                "Invalid quality '{}'. Valid values: high, medium, low",
                s
            ))),
        }
    }
}

/// One input-to-output conversion request with its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescription {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub quality: Quality,
    pub preserve_audio: bool,
    pub preset: String,
    pub max_bitrate: String,
    pub buffer_size: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl JobDescription {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        input_path: P,
        output_path: Q,
        settings: &ConversionSettings,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            quality: settings.quality,
            preserve_audio: settings.preserve_audio,
            preset: settings.preset.clone(),
            max_bitrate: settings.max_bitrate.clone(),
            buffer_size: settings.buffer_size.clone(),
            audio_codec: settings.audio_codec.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
        }
    }

    /// Job writing `<output_dir>/<input stem>.mov`
    pub fn into_directory<P: AsRef<Path>, Q: AsRef<Path>>(
        input_path: P,
        output_dir: Q,
        settings: &ConversionSettings,
    ) -> Self {
        let input_path = input_path.as_ref();
        let output_path = output_dir.as_ref().join(output_file_name(input_path));
        Self::new(input_path, output_path, settings)
    }

    pub fn input_name(&self) -> String {
        file_name(&self.input_path)
    }

    pub fn output_name(&self) -> String {
        file_name(&self.output_path)
    }
}

/// Default output location for a single conversion: the input with a .mov extension
pub fn default_output_path<P: AsRef<Path>>(input_path: P) -> PathBuf {
    input_path.as_ref().with_extension(OUTPUT_EXTENSION)
}

fn output_file_name(input_path: &Path) -> String {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.{}", stem, OUTPUT_EXTENSION)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failure,
}

/// Outcome of a single job, as stored in the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(rename = "input_file")]
    pub input_name: String,
    #[serde(rename = "output_file")]
    pub output_name: String,
    pub status: JobStatus,
    /// Human-readable output size, or "N/A" for failures
    #[serde(rename = "size")]
    pub output_size: String,
    #[serde(rename = "date")]
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(job: &JobDescription, output_size: String) -> Self {
        Self {
            input_name: job.input_name(),
            output_name: job.output_name(),
            status: JobStatus::Success,
            output_size,
            timestamp: Local::now(),
            error: None,
        }
    }

    pub fn failure<S: Into<String>>(job: &JobDescription, error: S) -> Self {
        Self {
            input_name: job.input_name(),
            output_name: job.output_name(),
            status: JobStatus::Failure,
            output_size: SIZE_NOT_AVAILABLE.to_string(),
            timestamp: Local::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    AllSucceeded,
    PartialFailure,
    Cancelled,
}

/// Progress of a batch run; also its terminal report
#[derive(Debug, Clone)]
pub struct BatchState {
    pub jobs: Vec<JobDescription>,
    /// Number of jobs started so far
    pub index: usize,
    pub successful: usize,
    pub failed: usize,
    /// Set when the run stopped with jobs left unstarted
    pub cancelled: bool,
    pub results: Vec<JobResult>,
}

impl BatchState {
    pub fn new(jobs: Vec<JobDescription>) -> Self {
        Self {
            jobs,
            index: 0,
            successful: 0,
            failed: 0,
            cancelled: false,
            results: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn completed(&self) -> usize {
        self.successful + self.failed
    }

    pub fn record(&mut self, result: JobResult) {
        if result.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    /// Job-count based progress in percent
    pub fn progress_percent(&self) -> f64 {
        if self.jobs.is_empty() {
            return 100.0;
        }
        self.completed() as f64 / self.total() as f64 * 100.0
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.cancelled {
            BatchOutcome::Cancelled
        } else if self.failed == 0 {
            BatchOutcome::AllSucceeded
        } else {
            BatchOutcome::PartialFailure
        }
    }
}
