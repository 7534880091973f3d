use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use indicatif::{HumanBytes, HumanCount, ProgressBar, ProgressStyle};

use crate::error::FingerprintError;

/// Receives per-file progress from the engine.
///
/// Calls may arrive from several hashing threads at once. Every method is a
/// no-op by default.
pub trait ProgressSink: Sync {
    fn on_scan_complete(&self, _total_files: usize, _total_bytes: u64) {}

    fn on_file_start(&self, _relative_path: &str) {}

    fn on_file_done(&self, _relative_path: &str, _bytes: u64) {}

    fn on_file_failed(&self, _relative_path: &str, _error: &FingerprintError) {}

    fn on_finish(&self) {}
}

/// Sink for non-interactive use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

/// Byte-based terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
    files_processed: AtomicUsize,
    bytes_processed: AtomicU64,
    last_update: Mutex<Instant>,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg} ETA: {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self {
            bar,
            files_processed: AtomicUsize::new(0),
            bytes_processed: AtomicU64::new(0),
            last_update: Mutex::new(Instant::now()),
        }
    }

    fn redraw(&self, files: usize, bytes: u64) {
        self.bar.set_position(bytes);
        self.bar.set_message(format!(
            "Hashed {} files ({})",
            HumanCount(files as u64),
            HumanBytes(bytes)
        ));
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn on_scan_complete(&self, _total_files: usize, total_bytes: u64) {
        self.bar.set_length(total_bytes);
        self.bar.reset_eta();
    }

    fn on_file_done(&self, _relative_path: &str, bytes: u64) {
        let files = self.files_processed.fetch_add(1, Ordering::Relaxed) + 1;
        let bytes = self.bytes_processed.fetch_add(bytes, Ordering::Relaxed) + bytes;

        // Redrawing on every file is costly with many small files.
        if let Ok(mut last_update) = self.last_update.lock() {
            if last_update.elapsed() > REDRAW_INTERVAL {
                self.redraw(files, bytes);
                *last_update = Instant::now();
            }
        }
    }

    fn on_file_failed(&self, relative_path: &str, _error: &FingerprintError) {
        self.bar.set_message(format!("Skipped {relative_path}"));
    }

    fn on_finish(&self) {
        self.redraw(
            self.files_processed.load(Ordering::Relaxed),
            self.bytes_processed.load(Ordering::Relaxed),
        );
        self.bar.finish_and_clear();
    }
}
