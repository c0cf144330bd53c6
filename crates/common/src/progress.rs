//! Bootstrap progress reporting.

use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};

/// Receives archive read-position updates during the initial pass.
///
/// The codec's tracked file calls this whenever the read position's
/// high-water mark advances; implementations decide whether and how to
/// surface that to the user.
pub trait ProgressSink {
    /// Called with the new high-water mark of the archive read position.
    fn on_progress(&mut self, position_hwm: u64);
}

/// A sink that ignores all updates. Used by serve-time readers.
pub struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    fn on_progress(&mut self, _position_hwm: u64) {}
}

/// Prints `Loading P%` lines while the initial archive pass runs.
///
/// The percentage is the archive-fd high-water mark over the file size,
/// which proxies how much of the archive has been processed. This matters
/// for raw archives, which need a complete decompression pass because
/// they carry no table of contents recording the decompressed size.
///
/// Messages are emitted at most once per second. On a terminal the
/// previous line is overwritten with an ANSI cursor-up + erase-line
/// sequence; otherwise the message goes to the log at info level.
pub struct LoadingProgress {
    file_size: u64,
    quiet: bool,
    period: Duration,
    next_emit: Instant,
    displayed: bool,
}

impl LoadingProgress {
    /// Create a progress reporter for an archive of `file_size` bytes.
    ///
    /// # Arguments
    /// * `file_size` - Total size of the archive file
    /// * `quiet` - Suppress all progress output
    pub fn new(file_size: u64, quiet: bool) -> Self {
        let period: Duration = Duration::from_secs(1);
        Self {
            file_size,
            quiet,
            period,
            next_emit: Instant::now() + period,
            displayed: false,
        }
    }

    fn percent(&self, position_hwm: u64) -> u64 {
        if self.file_size == 0 || position_hwm == 0 {
            return 0;
        }
        if position_hwm >= self.file_size {
            return 100;
        }
        (position_hwm as u128 * 100 / self.file_size as u128) as u64
    }

    /// Clear the progress line (or log completion) once bootstrap ends.
    pub fn finish(&mut self) {
        if !self.displayed {
            return;
        }
        if io::stderr().is_terminal() {
            let mut err = io::stderr();
            let _ = write!(err, "\x1b[F\x1b[K");
            let _ = err.flush();
        } else {
            tracing::info!("Loaded 100%");
        }
    }
}

impl ProgressSink for LoadingProgress {
    fn on_progress(&mut self, position_hwm: u64) {
        if self.quiet {
            return;
        }

        let now: Instant = Instant::now();
        if now < self.next_emit {
            return;
        }
        self.next_emit = now + self.period;

        let percent: u64 = self.percent(position_hwm);
        if io::stderr().is_terminal() {
            let mut err = io::stderr();
            if self.displayed {
                let _ = write!(err, "\x1b[F\x1b[K");
            }
            let _ = writeln!(err, "Loading {percent}%");
            let _ = err.flush();
        } else {
            tracing::info!("Loading {percent}%");
        }
        self.displayed = true;
    }
}
