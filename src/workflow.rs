use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::error::{ConvertError, Result};
use crate::format::format_file_size;
use crate::history::HistoryRecorder;
use crate::job::{BatchOutcome, BatchState, JobDescription, JobResult};
use crate::media::{MediaCommandBuilder, ProcessRunner};
use crate::progress::{ProgressEvent, ProgressParser, ProgressSender};
use crate::validate::{SpaceProbe, check_disk_space, is_supported_video, validate_input};

/// Cooperative cancellation flag shared between the presentation layer and a run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Marks a run as active; when the run ends, however it ends, clears the
/// running flag and any cancel request made during it
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a CancelToken,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool, cancel: &'a CancelToken) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ConvertError::AlreadyRunning)?;
        Ok(Self { running, cancel })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.cancel.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Drives single and batch conversions.
///
/// At most one run is active per converter. Progress leaves through the
/// event channel only.
pub struct Converter {
    commands: MediaCommandBuilder,
    runner: Box<dyn ProcessRunner>,
    space: Box<dyn SpaceProbe>,
    history: HistoryRecorder,
    events: ProgressSender,
    cancel: CancelToken,
    running: AtomicBool,
}

impl Converter {
    pub fn new(
        commands: MediaCommandBuilder,
        runner: Box<dyn ProcessRunner>,
        space: Box<dyn SpaceProbe>,
        history: HistoryRecorder,
        events: ProgressSender,
    ) -> Self {
        Self {
            commands,
            runner,
            space,
            history,
            events,
            cancel: CancelToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Token that stops a batch before its next job
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    /// Convert one file and record the outcome
    pub async fn convert_one(&self, job: JobDescription) -> Result<JobResult> {
        let _guard = RunGuard::acquire(&self.running, &self.cancel)?;

        info!("{}", "=".repeat(50));
        info!("Starting conversion:");
        info!("  Input: {}", job.input_name());
        info!("  Output: {}", job.output_name());
        info!("  Quality: {}", job.quality);
        info!("{}", "=".repeat(50));

        self.emit(ProgressEvent::JobStarted {
            index: 1,
            total: 1,
            input_name: job.input_name(),
        });

        let result = self.run_job(&job).await;
        self.finish_job(&result);
        Ok(result)
    }

    /// Convert jobs one after another in submitted order.
    ///
    /// Checks the cancel token before each job, so a cancel requested before
    /// the run starts stops it before the first job. Jobs already finished
    /// stay as they are. Returns the terminal batch state.
    pub async fn convert_many(&self, jobs: Vec<JobDescription>) -> Result<BatchState> {
        let _guard = RunGuard::acquire(&self.running, &self.cancel)?;

        let mut state = BatchState::new(jobs);
        let total = state.total();

        info!("{}", "=".repeat(50));
        info!("Starting batch conversion: {} files", total);
        info!("{}", "=".repeat(50));

        while state.index < total {
            if self.cancel.is_cancelled() {
                warn!("Batch cancelled with {} of {} files left", total - state.index, total);
                state.cancelled = true;
                break;
            }

            let job = state.jobs[state.index].clone();
            state.index += 1;
            let position = state.index;

            info!("[{}/{}] Converting: {}", position, total, job.input_name());
            self.emit(ProgressEvent::JobStarted {
                index: position,
                total,
                input_name: job.input_name(),
            });

            let result = self.run_job(&job).await;
            if result.is_success() {
                info!("[{}/{}] Success: {}", position, total, job.input_name());
            } else {
                warn!("[{}/{}] Failed: {}", position, total, job.input_name());
            }

            self.finish_job(&result);
            state.record(result);
            self.emit(ProgressEvent::BatchProgress(state.progress_percent()));
        }

        match state.outcome() {
            BatchOutcome::AllSucceeded => {
                info!("Batch conversion finished: {} files converted", state.successful)
            }
            BatchOutcome::PartialFailure => warn!(
                "Batch conversion finished: {} succeeded, {} failed",
                state.successful, state.failed
            ),
            BatchOutcome::Cancelled => warn!(
                "Batch conversion cancelled: {} succeeded, {} failed, {} not started",
                state.successful,
                state.failed,
                total - state.index
            ),
        }

        Ok(state)
    }

    /// Any error inside the job becomes a failure result
    async fn run_job(&self, job: &JobDescription) -> JobResult {
        match self.try_run_job(job).await {
            Ok(size) => {
                info!("Conversion finished. Size: {}", size);
                JobResult::success(job, size)
            }
            Err(e) => {
                error!("Conversion failed for {}: {}", job.input_name(), e);
                JobResult::failure(job, e.to_string())
            }
        }
    }

    async fn try_run_job(&self, job: &JobDescription) -> Result<String> {
        if !validate_input(&job.input_path) {
            return Err(ConvertError::Validation(format!(
                "{} is not a valid input",
                job.input_path.display()
            )));
        }

        if !check_disk_space(self.space.as_ref(), &job.input_path, &job.output_path) {
            return Err(ConvertError::Validation(format!(
                "Not enough free space for {}",
                job.output_path.display()
            )));
        }

        let command = self.commands.convert_to_mov(job);
        info!("FFmpeg command: {}", command);

        let mut parser = ProgressParser::new();
        let events = self.events.clone();
        let mut on_line = |line: &str| {
            if let Some(percent) = parser.feed(line) {
                let _ = events.send(ProgressEvent::JobProgress(percent));
            }
        };

        let output = self.runner.run(&command, &mut on_line).await?;
        if !output.success() {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ConvertError::Process(format!(
                "ffmpeg exited with {}: {}",
                code,
                output.diagnostics()
            )));
        }

        verify_output(&job.output_path)
    }

    fn finish_job(&self, result: &JobResult) {
        if let Err(e) = self.history.append(result) {
            warn!("Could not save history: {}", e);
        }
        self.emit(ProgressEvent::JobFinished(result.clone()));
    }

    fn emit(&self, event: ProgressEvent) {
        // The presentation side may already be gone
        let _ = self.events.send(event);
    }
}

/// The output must exist and be non-empty; returns its formatted size
fn verify_output(output_path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(output_path).map_err(|_| {
        ConvertError::Process(format!("Output file was not created: {}", output_path.display()))
    })?;

    if metadata.len() == 0 {
        return Err(ConvertError::Process(format!(
            "Output file is empty: {}",
            output_path.display()
        )));
    }

    Ok(format_file_size(metadata.len()))
}

/// Supported videos directly inside `dir`, sorted by name
pub fn collect_videos<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ConvertError::Config(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let videos: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_supported_video(p))
        .collect();

    info!("Found {} video files in {}", videos.len(), dir.display());
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let cancel = CancelToken::new();
        let guard = RunGuard::acquire(&flag, &cancel).unwrap();
        assert!(matches!(
            RunGuard::acquire(&flag, &cancel),
            Err(ConvertError::AlreadyRunning)
        ));
        drop(guard);
        assert!(RunGuard::acquire(&flag, &cancel).is_ok());
    }

    #[test]
    fn test_run_guard_clears_cancel_on_exit() {
        let flag = AtomicBool::new(false);
        let cancel = CancelToken::new();
        let guard = RunGuard::acquire(&flag, &cancel).unwrap();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        drop(guard);
        assert!(!cancel.is_cancelled());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_verify_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mov");
        assert!(verify_output(&missing).is_err());

        let empty = dir.path().join("empty.mov");
        std::fs::write(&empty, b"").unwrap();
        assert!(verify_output(&empty).is_err());

        let full = dir.path().join("full.mov");
        std::fs::write(&full, vec![0u8; 2048]).unwrap();
        assert_eq!(verify_output(&full).unwrap(), "2.0 KB");
    }

    #[test]
    fn test_collect_videos_is_flat_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.MKV", "a.avi", "notes.txt", "c.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("d.mkv"), b"x").unwrap();

        let videos = collect_videos(dir.path()).unwrap();
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.avi", "b.MKV"]);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!shared.is_cancelled());
    }
}
