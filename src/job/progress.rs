use std::time::Duration;

use crate::protocol::Info;

/// Counters a job accumulates from its worker's info notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub total_size: u64,
    pub total_files: u64,
    pub total_dirs: u64,
    pub processed_size: u64,
    pub processed_files: u64,
    pub processed_dirs: u64,
    /// Bytes per second, as last reported.
    pub speed: u64,
    /// Set once the worker reports a speed of zero.
    pub stalled: bool,
    /// Resource currently being read, scanned or removed.
    pub from: Option<String>,
    /// Resource currently being written or created.
    pub to: Option<String>,
    percent: Option<u8>,
}

impl Progress {
    /// Folds one notification in. Returns the new percentage when it moved.
    pub fn apply(&mut self, info: &Info) -> Option<u8> {
        match info {
            Info::TotalSize(n) => {
                self.total_size = *n;
                return self.refresh_percent();
            }
            Info::TotalFiles(n) => self.total_files = *n,
            Info::TotalDirs(n) => self.total_dirs = *n,
            Info::ProcessedSize(n) => {
                self.processed_size = *n;
                return self.refresh_percent();
            }
            Info::ProcessedFiles(n) => self.processed_files = *n,
            Info::ProcessedDirs(n) => self.processed_dirs = *n,
            Info::Speed(n) => {
                self.speed = *n;
                self.stalled = *n == 0;
            }
            Info::ScanningDir(dir) => self.from = Some(dir.clone()),
            Info::CopyingFile { from, to } => {
                self.from = Some(from.clone());
                self.to = Some(to.clone());
            }
            Info::MakingDir(dir) => self.to = Some(dir.clone()),
            Info::GettingFile(file) => self.from = Some(file.clone()),
            Info::DeletingFile(file) => self.from = Some(file.clone()),
            Info::Redirection(_) | Info::MimeType(_) | Info::ErrorPage => {}
        }
        None
    }

    /// Counts bytes that went past the job itself, such as `DATA` frames.
    pub fn add_processed(&mut self, bytes: u64) -> Option<u8> {
        self.processed_size = self.processed_size.saturating_add(bytes);
        self.refresh_percent()
    }

    pub fn renamed(&mut self, name: &str) {
        self.to = Some(name.to_string());
    }

    /// Completion in whole percent, once the total size is known.
    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    /// Time left at the last reported speed.
    pub fn remaining(&self) -> Option<Duration> {
        if self.speed == 0 || self.total_size == 0 {
            return None;
        }
        let left = self.total_size.saturating_sub(self.processed_size);
        Some(Duration::from_secs(left.div_ceil(self.speed)))
    }

    fn refresh_percent(&mut self) -> Option<u8> {
        if self.total_size == 0 {
            return None;
        }
        let ratio = self.processed_size.min(self.total_size) as u128 * 100 / self.total_size as u128;
        let percent = ratio as u8;
        if self.percent == Some(percent) {
            return None;
        }
        self.percent = Some(percent);
        Some(percent)
    }
}

/// Formats a byte count with a binary unit, e.g. `1.5 KiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
