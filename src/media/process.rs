use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::MediaCommand;
use crate::error::{ConvertError, Result};

/// Number of trailing stderr lines kept for failure diagnostics
pub const STDERR_TAIL_LINES: usize = 50;

/// What a finished child process left behind
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stderr_tail: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn diagnostics(&self) -> String {
        self.stderr_tail.join("\n")
    }
}

/// Runs a command as a child process, handing each stderr line to `on_line`
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        command: &MediaCommand,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<ProcessOutput>;
}

/// Supervisor for real child processes.
///
/// The child is never killed from here; it runs until it exits on its own.
pub struct ChildProcessRunner;

#[async_trait]
impl ProcessRunner for ChildProcessRunner {
    async fn run(
        &self,
        command: &MediaCommand,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<ProcessOutput> {
        debug!("Spawning: {}", command);

        let mut child = command.to_command().spawn().map_err(|e| {
            ConvertError::Process(format!("Failed to start {}: {}", command.binary_path, e))
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConvertError::Process("Child stderr was not captured".to_string()))?;

        // ffmpeg writes little to stdout, but an undrained pipe could still stall it
        let stdout_drain = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut sink = tokio::io::sink();
                let _ = tokio::io::copy(&mut stdout, &mut sink).await;
            })
        });

        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        loop {
            match read_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    on_line(&line);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped reading {} output: {}", command.binary_path, e);
                    break;
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ConvertError::Process(format!("Failed to wait for {}: {}", command.binary_path, e)))?;

        if let Some(handle) = stdout_drain {
            let _ = handle.await;
        }

        debug!("{} exited with {}", command.binary_path, status);
        Ok(ProcessOutput {
            exit_code: status.code(),
            stderr_tail: tail.into_iter().collect(),
        })
    }
}

/// Read the next line, treating both `\n` and `\r` as terminators.
///
/// ffmpeg redraws its status line with bare carriage returns, so a plain
/// `lines()` reader would only see progress once the job is over. Invalid
/// UTF-8 is replaced rather than reported.
pub async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Ok(None);
                }
                (0, true)
            } else if let Some(pos) = available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                buf.extend_from_slice(&available[..pos]);
                (pos + 1, true)
            } else {
                buf.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(consumed);

        if done {
            return Ok(Some(String::from_utf8_lossy(buf).into_owned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_lines<R: AsyncBufRead + Unpin>(mut reader: R) -> Vec<String> {
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = read_line_lossy(&mut reader, &mut buf).await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_splits_on_carriage_returns_across_chunks() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Duration: 00:00:10.00\nframe=1 time=00:00:0")
            .read(b"5.00 bitrate\rframe=2 time=00:00:10.00\r\n")
            .read(b"trailing")
            .build();

        let lines = collect_lines(BufReader::new(mock)).await;
        assert_eq!(
            lines,
            vec![
                "Duration: 00:00:10.00",
                "frame=1 time=00:00:05.00 bitrate",
                "frame=2 time=00:00:10.00",
                "",
                "trailing",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let input: &[u8] = b"ok\n\xff\xfe bad\n";
        let lines = collect_lines(input).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with(" bad"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_streams_stderr_and_exit_code() {
        let command = MediaCommand::new("sh", "test script").args([
            "-c",
            "printf 'Duration: 00:01:40.00\\rtime=00:00:50.00\\n' >&2; echo ignored; exit 3",
        ]);

        let mut seen = Vec::new();
        let output = ChildProcessRunner
            .run(&command, &mut |line: &str| seen.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Duration: 00:01:40.00", "time=00:00:50.00"]);
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr_tail, seen);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_reports_missing_binary() {
        let command = MediaCommand::new("/nonexistent/movconv-tool", "missing");
        let result = ChildProcessRunner.run(&command, &mut |_: &str| {}).await;
        assert!(matches!(result, Err(ConvertError::Process(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let command = MediaCommand::new("sh", "noisy")
            .args(["-c", "i=0; while [ $i -lt 120 ]; do echo line$i >&2; i=$((i+1)); done"]);

        let mut count = 0;
        let output = ChildProcessRunner
            .run(&command, &mut |_: &str| count += 1)
            .await
            .unwrap();

        assert_eq!(count, 120);
        assert!(output.success());
        assert_eq!(output.stderr_tail.len(), STDERR_TAIL_LINES);
        assert_eq!(output.stderr_tail.last().map(|s| s.as_str()), Some("line119"));
    }
}
