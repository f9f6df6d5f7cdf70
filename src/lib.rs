//! movconv - Video to iPhone MOV converter
//!
//! Drives ffmpeg to turn MPG/AVI/MKV/WMV/FLV/WEBM files into MOV files that
//! play on iPhone-class devices, with progress reporting, pre-flight checks
//! and a persisted conversion history.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod history;
pub mod job;
pub mod media;
pub mod progress;
pub mod validate;
pub mod workflow;
