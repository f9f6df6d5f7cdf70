//! movconv - Video to iPhone MOV converter
//!
//! This is the main entry point for the movconv command line tool, which
//! converts common video formats into iPhone-compatible MOV files by driving
//! ffmpeg.

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use movconv::cli::{Args, Commands, HistoryAction, SettingsAction};
use movconv::config::{DATA_DIR, DEFAULT_SETTINGS_FILE, Settings};
use movconv::error::ConvertError;
use movconv::format::{format_duration, format_file_size, truncate};
use movconv::history::HistoryRecorder;
use movconv::job::{BatchOutcome, BatchState, JobDescription, JobResult, default_output_path};
use movconv::media::{MediaCommandBuilder, MediaInfo, MediaProcessorFactory};
use movconv::progress::{ProgressEvent, ProgressReceiver, poll_events, progress_channel};
use movconv::validate::{FsSpaceProbe, is_supported_video};
use movconv::workflow::{Converter, collect_videos};

/// How often the display drains the progress queue
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest failure detail shown for a single conversion
const FAILURE_DETAIL_CHARS: usize = 200;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;
    info!("Starting movconv - Video to iPhone MOV converter");

    // Load settings; an explicit path must be readable when it exists
    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let mut settings = match &args.config {
        Some(path) if path.exists() => Settings::from_file(path)?,
        _ => Settings::load_or_default(&settings_path),
    };

    match args.command {
        Commands::Convert {
            input,
            output,
            overwrite,
            encode,
        } => {
            if !input.exists() {
                return Err(ConvertError::FileNotFound(input.display().to_string()).into());
            }
            encode.apply(&mut settings.conversion)?;

            let output = output.unwrap_or_else(|| default_output_path(&input));
            if output.exists() && !overwrite {
                bail!(
                    "{} already exists; pass --overwrite to replace it",
                    output.display()
                );
            }

            ensure_tools(&settings).await?;

            let job = JobDescription::new(&input, &output, &settings.conversion);
            let (converter, events) = build_converter(&settings);
            let worker = {
                let converter = converter.clone();
                tokio::spawn(async move { converter.convert_one(job).await })
            };

            let result = watch_run(&converter, events, worker, false, settings.general.dark_mode).await?;
            report_single(&result, &output, &settings)?;
        }
        Commands::Batch {
            inputs,
            input_dir,
            output_dir,
            encode,
        } => {
            encode.apply(&mut settings.conversion)?;

            let files = gather_batch_inputs(inputs, input_dir.as_deref())?;
            if files.is_empty() {
                bail!("No supported video files to convert");
            }

            ensure_tools(&settings).await?;
            std::fs::create_dir_all(&output_dir)?;
            info!("Converting {} files into {}", files.len(), output_dir.display());

            let jobs: Vec<JobDescription> = files
                .iter()
                .map(|file| JobDescription::into_directory(file, &output_dir, &settings.conversion))
                .collect();

            let (converter, events) = build_converter(&settings);
            let worker = {
                let converter = converter.clone();
                tokio::spawn(async move { converter.convert_many(jobs).await })
            };

            let state = watch_run(&converter, events, worker, true, settings.general.dark_mode).await?;
            report_batch(&state);

            if state.successful > 0 && settings.general.auto_open_folder {
                open_folder(&output_dir);
            }
        }
        Commands::Probe { input } => {
            if !input.exists() {
                return Err(ConvertError::FileNotFound(input.display().to_string()).into());
            }
            let processor = MediaProcessorFactory::create_processor(settings.media.clone());
            let media_info = processor.probe(&input).await?;
            print_media_info(&input, &media_info);
        }
        Commands::Check => {
            let processor = MediaProcessorFactory::create_processor(settings.media.clone());
            match processor.check_availability().await {
                Ok(()) => {
                    let version = processor.get_version_info().await?;
                    println!("ffmpeg:  {}", settings.media.ffmpeg_path);
                    println!("ffprobe: {}", settings.media.ffprobe_path);
                    println!("Version: {}", version);
                }
                Err(e) => {
                    println!("Media tools are not available: {}", e);
                    println!("Install FFmpeg and make sure ffmpeg and ffprobe are on PATH.");
                    return Err(e.into());
                }
            }
        }
        Commands::History { action } => {
            let recorder = HistoryRecorder::new(&settings.general.history_path);
            match action {
                HistoryAction::List { limit } => {
                    let entries = recorder.load();
                    if entries.is_empty() {
                        println!("No conversions recorded.");
                    } else {
                        print_history(&entries, limit.unwrap_or(entries.len()));
                    }
                }
                HistoryAction::Clear => {
                    recorder.clear()?;
                    println!("History cleared");
                }
                HistoryAction::Path => {
                    println!("{}", recorder.path().display());
                }
            }
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => {
                let content = toml::to_string_pretty(&settings)
                    .map_err(|e| anyhow!("Failed to serialize settings: {}", e))?;
                println!("# {}", settings_path.display());
                println!("{}", content);
            }
            SettingsAction::Save { changes } => {
                changes.apply(&mut settings)?;
                settings.save_to_file(&settings_path)?;
                println!("Settings saved to {}", settings_path.display());
            }
            SettingsAction::Reset => {
                Settings::default().save_to_file(&settings_path)?;
                println!("Settings reset to defaults in {}", settings_path.display());
            }
        },
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(DATA_DIR).join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "movconv.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("movconv.log").display()
    );

    Ok(())
}

/// Fail early with install guidance when ffmpeg cannot be run
async fn ensure_tools(settings: &Settings) -> Result<()> {
    let processor = MediaProcessorFactory::create_processor(settings.media.clone());
    processor.check_availability().await.map_err(|e| {
        anyhow!(
            "{}. Install FFmpeg and make sure it is on PATH, or set media.ffmpeg_path in {}",
            e,
            DEFAULT_SETTINGS_FILE
        )
    })
}

fn build_converter(settings: &Settings) -> (Arc<Converter>, ProgressReceiver) {
    let (sender, receiver) = progress_channel();
    let converter = Converter::new(
        MediaCommandBuilder::new(&settings.media.ffmpeg_path, &settings.media.ffprobe_path),
        MediaProcessorFactory::create_runner(),
        Box::new(FsSpaceProbe),
        HistoryRecorder::new(&settings.general.history_path),
        sender,
    );
    (Arc::new(converter), receiver)
}

/// Explicit files first, then folder contents; unsupported and repeated paths are skipped
fn gather_batch_inputs(inputs: Vec<PathBuf>, input_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    for input in inputs {
        if is_supported_video(&input) {
            candidates.push(input);
        } else {
            warn!("Skipping unsupported or missing file: {}", input.display());
        }
    }
    if let Some(dir) = input_dir {
        candidates.extend(collect_videos(dir)?);
    }

    let mut seen = HashSet::new();
    Ok(candidates
        .into_iter()
        .filter(|path| {
            let key = path.canonicalize().unwrap_or_else(|_| path.clone());
            seen.insert(key)
        })
        .collect())
}

/// Bars drawn while a run is active
struct ProgressDisplay {
    _multi: MultiProgress,
    file: ProgressBar,
    overall: Option<ProgressBar>,
}

impl ProgressDisplay {
    fn new(batch: bool, dark_mode: bool) -> Result<Self> {
        let colors = if dark_mode { "white/black" } else { "cyan/blue" };
        let style = ProgressStyle::with_template(&format!(
            "{{prefix:>7}} [{{bar:40.{}}}] {{pos:>3}}% {{msg}}",
            colors
        ))?
        .progress_chars("=> ");

        let multi = MultiProgress::new();
        let file = multi.add(ProgressBar::new(100));
        file.set_style(style.clone());

        let overall = if batch {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style);
            bar.set_prefix("batch");
            Some(bar)
        } else {
            None
        };

        Ok(Self {
            _multi: multi,
            file,
            overall,
        })
    }

    fn apply(&self, events: Vec<ProgressEvent>) {
        for event in events {
            match event {
                ProgressEvent::JobStarted {
                    index,
                    total,
                    input_name,
                } => {
                    self.file.set_position(0);
                    self.file.set_prefix(format!("{}/{}", index, total));
                    self.file.set_message(input_name);
                }
                ProgressEvent::JobProgress(percent) => {
                    self.file.set_position(percent.round() as u64);
                }
                ProgressEvent::JobFinished(result) => {
                    if self.overall.is_some() {
                        self.file.println(describe_result(&result));
                    }
                }
                ProgressEvent::BatchProgress(percent) => {
                    if let Some(overall) = &self.overall {
                        overall.set_position(percent.round() as u64);
                    }
                }
            }
        }
    }

    fn finish(&self) {
        self.file.finish_and_clear();
        if let Some(overall) = &self.overall {
            overall.finish_and_clear();
        }
    }
}

/// Draw progress until the worker finishes; Ctrl-C cancels before the next job
async fn watch_run<T>(
    converter: &Converter,
    mut events: ProgressReceiver,
    mut worker: JoinHandle<movconv::error::Result<T>>,
    batch: bool,
    dark_mode: bool,
) -> Result<T> {
    let display = ProgressDisplay::new(batch, dark_mode)?;
    let cancel = converter.cancel_token();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut interrupted = false;

    // Registered once so an interrupt between polls is not lost
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                display.apply(poll_events(&mut events).events);
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if batch {
                    cancel.cancel();
                }
                display.file.println(interrupt_notice(batch));
            }
            joined = &mut worker => {
                display.apply(poll_events(&mut events).events);
                display.finish();
                return Ok(joined??);
            }
        }
    }
}

fn interrupt_notice(batch: bool) -> &'static str {
    if batch {
        "Cancelling after the current file finishes..."
    } else {
        "A single conversion cannot be cancelled; waiting for it to finish..."
    }
}

fn describe_result(result: &JobResult) -> String {
    if result.is_success() {
        format!(
            "  OK    {} -> {} ({})",
            result.input_name, result.output_name, result.output_size
        )
    } else {
        format!(
            "  FAIL  {}: {}",
            result.input_name,
            truncate(result.error.as_deref().unwrap_or("unknown error"), FAILURE_DETAIL_CHARS)
        )
    }
}

fn report_single(result: &JobResult, output: &Path, settings: &Settings) -> Result<()> {
    if !result.is_success() {
        let detail = result.error.as_deref().unwrap_or("unknown error");
        bail!(
            "Conversion failed for {}: {}",
            result.input_name,
            truncate(detail, FAILURE_DETAIL_CHARS)
        );
    }

    println!(
        "Converted {} -> {} ({})",
        result.input_name,
        output.display(),
        result.output_size
    );

    if settings.general.auto_open_folder {
        let folder = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        open_folder(folder);
    }
    Ok(())
}

fn report_batch(state: &BatchState) {
    let total = state.total();
    println!();
    match state.outcome() {
        BatchOutcome::AllSucceeded => {
            println!("All {} files converted successfully.", state.successful);
        }
        BatchOutcome::PartialFailure => {
            println!(
                "Batch finished: {} succeeded, {} failed.",
                state.successful, state.failed
            );
        }
        BatchOutcome::Cancelled => {
            println!(
                "Batch cancelled: {} succeeded, {} failed, {} not started.",
                state.successful,
                state.failed,
                total - state.index
            );
        }
    }

    let failures: Vec<&JobResult> = state.results.iter().filter(|r| !r.is_success()).collect();
    if !failures.is_empty() {
        println!("\nFailed files:");
        for result in failures {
            println!("{}", describe_result(result));
        }
    }
}

fn print_media_info(input: &Path, info: &MediaInfo) {
    println!("\nFile:      {}", input.display());
    println!("Size:      {}", format_file_size(info.size_bytes));
    println!("Duration:  {}", format_duration(info.duration_seconds));
    println!(
        "Container: {}",
        info.format_name.as_deref().unwrap_or("unknown")
    );

    match &info.video {
        Some(video) => {
            let resolution = match (video.width, video.height) {
                (Some(w), Some(h)) => format!("{}x{}", w, h),
                _ => "unknown".to_string(),
            };
            let fps = video
                .frame_rate
                .map(|fps| format!("{:.2} fps", fps))
                .unwrap_or_else(|| "unknown fps".to_string());
            println!(
                "Video:     {} {} {}",
                video.codec.as_deref().unwrap_or("unknown"),
                resolution,
                fps
            );
        }
        None => println!("Video:     none"),
    }

    match &info.audio {
        Some(audio) => {
            let bitrate = audio
                .bit_rate
                .map(|b| format!("{} kb/s", b / 1000))
                .unwrap_or_else(|| "unknown bitrate".to_string());
            let channels = audio
                .channels
                .map(|c| format!("{} ch", c))
                .unwrap_or_default();
            println!(
                "Audio:     {} {} {}",
                audio.codec.as_deref().unwrap_or("unknown"),
                bitrate,
                channels
            );
        }
        None => println!("Audio:     none"),
    }
}

fn print_history(entries: &[JobResult], limit: usize) {
    println!(
        "\n{:<20} {:<8} {:<10} {:<30} {:<30}",
        "Date", "Status", "Size", "Input", "Output"
    );
    println!("{}", "-".repeat(100));

    for entry in entries.iter().take(limit) {
        println!(
            "{:<20} {:<8} {:<10} {:<30} {:<30}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.status),
            entry.output_size,
            truncate(&entry.input_name, 30),
            truncate(&entry.output_name, 30)
        );
    }
}

/// Show a folder with the platform file manager; failures only get logged
fn open_folder(dir: &Path) {
    let opener = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };

    match std::process::Command::new(opener).arg(dir).spawn() {
        Ok(_) => info!("Opened {}", dir.display()),
        Err(e) => warn!("Could not open {}: {}", dir.display(), e),
    }
}
