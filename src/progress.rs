//! Progress parsing and the queue that carries progress to the presentation layer.
//!
//! ffmpeg prints `Duration: HH:MM:SS.CC` once per input and then keeps
//! rewriting a status line containing `time=HH:MM:SS.CC`. The parser turns
//! those lines into completion percentages, and the worker pushes them into an
//! unbounded channel that the presentation side drains without blocking.

use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::job::JobResult;

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid duration regex")
});

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").expect("valid time regex")
});

/// Line-at-a-time parser for one job's diagnostic stream
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    total_duration_seconds: Option<f64>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_duration(&self) -> Option<f64> {
        self.total_duration_seconds
    }

    /// Feed one line; returns a completion percentage when the line carries one
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        if self.total_duration_seconds.is_none() {
            if let Some(seconds) = parse_timestamp(&DURATION_PATTERN, line) {
                self.total_duration_seconds = Some(seconds);
            }
        }

        let total = self.total_duration_seconds.filter(|total| *total > 0.0)?;
        let current = parse_timestamp(&TIME_PATTERN, line)?;
        Some((current / total * 100.0).clamp(0.0, 100.0))
    }
}

fn parse_timestamp(pattern: &Regex, line: &str) -> Option<f64> {
    let caps = pattern.captures(line)?;
    let field = |i: usize| -> Option<f64> { caps.get(i)?.as_str().parse::<u32>().ok().map(f64::from) };

    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let centis = field(4)?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + centis / 100.0)
}

/// Messages from the conversion worker to the presentation layer
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    JobStarted {
        /// 1-based position in the run
        index: usize,
        total: usize,
        input_name: String,
    },
    /// Percent of the running job, from the tool's progress markers
    JobProgress(f64),
    JobFinished(JobResult),
    /// Percent of jobs completed in a batch
    BatchProgress(f64),
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events collected by one non-blocking poll of the queue
#[derive(Debug, Default)]
pub struct PolledEvents {
    pub events: Vec<ProgressEvent>,
    /// The worker side has hung up and the queue is empty
    pub disconnected: bool,
}

/// Drain everything currently queued without waiting.
///
/// Runs of job percentages collapse to the newest one, so the display only
/// applies the latest sample.
pub fn poll_events(receiver: &mut ProgressReceiver) -> PolledEvents {
    let mut polled = PolledEvents::default();
    loop {
        match receiver.try_recv() {
            Ok(ProgressEvent::JobProgress(percent)) => {
                if let Some(ProgressEvent::JobProgress(last)) = polled.events.last_mut() {
                    *last = percent;
                } else {
                    polled.events.push(ProgressEvent::JobProgress(percent));
                }
            }
            Ok(event) => polled.events.push(event),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                polled.disconnected = true;
                break;
            }
        }
    }
    polled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_then_time_yields_percent() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.feed("  Duration: 00:01:40.00, start: 0.000000, bitrate: 1205 kb/s"), None);
        assert_eq!(parser.total_duration(), Some(100.0));

        let percent = parser
            .feed("frame=  750 fps=120 q=28.0 size=    1024kB time=00:00:50.00 bitrate= 167.8kbits/s speed=8x")
            .unwrap();
        assert!((percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_before_duration_yields_nothing() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.feed("time=00:00:50.00"), None);
    }

    #[test]
    fn test_centiseconds_are_included() {
        let mut parser = ProgressParser::new();
        parser.feed("Duration: 01:00:00.50");
        assert_eq!(parser.total_duration(), Some(3600.5));
    }

    #[test]
    fn test_duration_is_taken_once() {
        let mut parser = ProgressParser::new();
        parser.feed("Duration: 00:01:40.00");
        parser.feed("Duration: 00:10:00.00");
        assert_eq!(parser.total_duration(), Some(100.0));
    }

    #[test]
    fn test_zero_duration_never_reports() {
        let mut parser = ProgressParser::new();
        parser.feed("Duration: 00:00:00.00");
        assert_eq!(parser.feed("time=00:00:01.00"), None);
    }

    #[test]
    fn test_overshoot_is_clamped() {
        let mut parser = ProgressParser::new();
        parser.feed("Duration: 00:00:10.00");
        assert_eq!(parser.feed("time=00:00:12.00"), Some(100.0));
    }

    #[test]
    fn test_garbled_lines_are_ignored() {
        let mut parser = ProgressParser::new();
        for line in ["", "Duration: N/A", "time=aa:bb:cc.dd", "\u{fffd}\u{fffd}time=", "Duration: 00:01"] {
            assert_eq!(parser.feed(line), None);
        }
        assert_eq!(parser.total_duration(), None);
    }

    #[test]
    fn test_poll_keeps_latest_percent() {
        let (tx, mut rx) = progress_channel();
        tx.send(ProgressEvent::JobProgress(10.0)).unwrap();
        tx.send(ProgressEvent::JobProgress(20.0)).unwrap();
        tx.send(ProgressEvent::BatchProgress(50.0)).unwrap();
        tx.send(ProgressEvent::JobProgress(5.0)).unwrap();

        let polled = poll_events(&mut rx);
        assert!(!polled.disconnected);
        assert_eq!(polled.events.len(), 3);
        assert!(matches!(polled.events[0], ProgressEvent::JobProgress(p) if p == 20.0));
        assert!(matches!(polled.events[1], ProgressEvent::BatchProgress(p) if p == 50.0));
        assert!(matches!(polled.events[2], ProgressEvent::JobProgress(p) if p == 5.0));

        assert!(poll_events(&mut rx).events.is_empty());
        drop(tx);
        assert!(poll_events(&mut rx).disconnected);
    }
}
