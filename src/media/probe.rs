use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

// Structs for parsing ffprobe JSON output. ffprobe reports most numbers as
// strings, so those stay strings here and are parsed in `MediaInfo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub format: ProbeFormat,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    pub bit_rate: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub bit_rate: Option<String>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub codec: Option<String>,
    pub bit_rate: Option<u64>,
    pub channels: Option<u32>,
}

/// Summary of a media file for display
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub format_name: Option<String>,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
}

impl From<ProbeOutput> for MediaInfo {
    fn from(probe: ProbeOutput) -> Self {
        let stream_of = |kind: &str| {
            probe
                .streams
                .iter()
                .find(|s| s.codec_type.as_deref() == Some(kind))
        };

        let video = stream_of("video").map(|s| VideoStreamInfo {
            codec: s.codec_name.clone(),
            width: s.width,
            height: s.height,
            frame_rate: s.r_frame_rate.as_deref().and_then(parse_frame_rate),
        });

        let audio = stream_of("audio").map(|s| AudioStreamInfo {
            codec: s.codec_name.clone(),
            bit_rate: s.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            channels: s.channels,
        });

        MediaInfo {
            format_name: probe.format.format_name.clone(),
            duration_seconds: probe
                .format
                .duration
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0),
            size_bytes: probe
                .format
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            video,
            audio,
        }
    }
}

pub fn parse_probe_output(json: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ConvertError::Media(format!("Failed to parse probe output: {}", e)))?;
    Ok(probe.into())
}

/// Parse a rational frame rate such as "30000/1001"
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = match rate.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (rate.trim().parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}
