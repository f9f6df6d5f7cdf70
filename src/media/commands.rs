use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::job::JobDescription;

/// Keeps a console window from flashing up for each child on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Keeps console Ctrl-C away from the child on Windows
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Abstract media processing command representation
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Set a single-valued option, e.g. `option("-preset", "slow")`
    pub fn option<K: Into<String>, V: Into<String>>(self, key: K, value: V) -> Self {
        self.arg(key).arg(value)
    }

    /// Build the process for this command with captured output streams.
    ///
    /// The child gets its own process group, so a terminal Ctrl-C reaches
    /// only this program and a running conversion is left to finish.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary_path);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);

        cmd
    }

    /// Run to completion and return standard output
    pub async fn execute_capture(&self) -> Result<String> {
        debug!("Executing media command: {}", self);
        debug!("Description: {}", self.description);

        let output = self
            .to_command()
            .output()
            .await
            .map_err(|e| ConvertError::Media(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl fmt::Display for MediaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary_path)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builder for the commands the converter runs
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Build the MOV conversion command.
    ///
    /// Argument order is fixed so invocations can be diffed in the logs.
    pub fn convert_to_mov(&self, job: &JobDescription) -> MediaCommand {
        let cmd = MediaCommand::new(&self.ffmpeg_path, "MOV conversion")
            .input(&job.input_path)
            .overwrite()
            .video_codec("libx264")
            .option("-preset", job.preset.as_str())
            .option("-crf", job.quality.crf().to_string());

        let cmd = if job.preserve_audio {
            cmd.audio_codec(job.audio_codec.as_str())
                .audio_bitrate(job.audio_bitrate.as_str())
        } else {
            cmd.no_audio().audio_bitrate("0")
        };

        cmd.option("-movflags", "+faststart")
            .option("-pix_fmt", "yuv420p")
            .option("-profile:v", "high")
            .option("-level", "4.1")
            .option("-maxrate", job.max_bitrate.as_str())
            .option("-bufsize", job.buffer_size.as_str())
            .output(&job.output_path)
    }

    /// Build the stream/container inspection command
    pub fn probe<P: AsRef<Path>>(&self, input_path: P) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Media probe")
            .option("-v", "quiet")
            .option("-print_format", "json")
            .arg("-show_format")
            .arg("-show_streams")
            .output(input_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Version check").arg("-version")
    }

    pub fn probe_version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Probe version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionSettings;
    use crate::job::Quality;

    fn builder() -> MediaCommandBuilder {
        MediaCommandBuilder::new("ffmpeg", "ffprobe")
    }

    fn job(quality: Quality, preserve_audio: bool) -> JobDescription {
        let settings = ConversionSettings {
            quality,
            preserve_audio,
            preset: "slow".to_string(),
            max_bitrate: "8M".to_string(),
            buffer_size: "12M".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        };
        JobDescription::new("/in/movie.mkv", "/out/movie.mov", &settings)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn test_full_argument_order() {
        let cmd = builder().convert_to_mov(&job(Quality::Medium, true));
        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec![
                "-i", "/in/movie.mkv", "-y", "-c:v", "libx264", "-preset", "slow", "-crf", "23",
                "-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart", "-pix_fmt", "yuv420p",
                "-profile:v", "high", "-level", "4.1", "-maxrate", "8M", "-bufsize", "12M",
                "/out/movie.mov",
            ]
        );
    }

    #[test]
    fn test_crf_follows_quality() {
        for (quality, crf) in [(Quality::High, "18"), (Quality::Medium, "23"), (Quality::Low, "28")] {
            let cmd = builder().convert_to_mov(&job(quality, true));
            assert_eq!(value_after(&cmd.args, "-crf"), Some(crf));
        }
    }

    #[test]
    fn test_audio_disabled_ignores_audio_settings() {
        let cmd = builder().convert_to_mov(&job(Quality::High, false));
        assert!(cmd.args.iter().any(|a| a == "-an"));
        assert!(!cmd.args.iter().any(|a| a == "-c:a" || a == "aac" || a == "192k"));
        assert_eq!(value_after(&cmd.args, "-b:a"), Some("0"));

        let an = cmd.args.iter().position(|a| a == "-an").unwrap();
        let crf = cmd.args.iter().position(|a| a == "-crf").unwrap();
        let movflags = cmd.args.iter().position(|a| a == "-movflags").unwrap();
        assert!(crf < an && an < movflags);
    }

    #[test]
    fn test_output_path_is_last() {
        let cmd = builder().convert_to_mov(&job(Quality::Low, false));
        assert_eq!(cmd.args.last().map(|s| s.as_str()), Some("/out/movie.mov"));
    }

    #[test]
    fn test_probe_command() {
        let cmd = builder().probe("/in/movie.mkv");
        assert_eq!(
            cmd.to_string(),
            "ffprobe -v quiet -print_format json -show_format -show_streams /in/movie.mkv"
        );
    }

    /// pid and process group id from a `/proc/<pid>/stat` line
    #[cfg(target_os = "linux")]
    fn pid_and_pgid(stat: &str) -> (i32, i32) {
        let pid = stat.split_whitespace().next().unwrap().parse().unwrap();
        let after_comm = &stat[stat.rfind(')').unwrap() + 1..];
        let pgid = after_comm.split_whitespace().nth(2).unwrap().parse().unwrap();
        (pid, pgid)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_child_leads_its_own_process_group() {
        let command = MediaCommand::new("sh", "report process group").args(["-c", "cat /proc/$$/stat"]);
        let stdout = command.execute_capture().await.unwrap();

        let (child_pid, child_pgid) = pid_and_pgid(stdout.trim());
        let (_, own_pgid) = pid_and_pgid(&std::fs::read_to_string("/proc/self/stat").unwrap());

        assert_eq!(child_pgid, child_pid);
        assert_ne!(child_pgid, own_pgid);
    }
}
