use crate::error::{Result, WardenError};
use crate::logs::LineSink;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Default maximum log file size before rotation (100MB)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;

/// Default number of rotated files to keep
pub const DEFAULT_MAX_BACKUPS: usize = 3;

/// Default age after which rotated files are removed (28 days)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(28 * 24 * 60 * 60);

struct FileState {
    file: File,
    size: u64,
}

/// Line sink appending to a file, rotating it once it grows past a size
///
/// Rotated files are renamed `<stem>-<timestamp>.log` next to the live file.
/// Backups older than `max_age` are removed, and of the rest only the newest
/// `max_backups` are kept.
pub struct FileSink {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    max_age: Option<Duration>,
    timestamps: bool,
    state: Mutex<FileState>,
}

impl FileSink {
    /// Open (or create) `path` with the default rotation settings
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_rotation(path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_BACKUPS)
    }

    /// Open (or create) `path`, rotating at `max_size` bytes and keeping
    /// `max_backups` rotated files
    pub fn with_rotation(path: impl AsRef<Path>, max_size: u64, max_backups: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WardenError::LogFile(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path,
            max_size,
            max_backups,
            max_age: Some(DEFAULT_MAX_AGE),
            timestamps: false,
            state: Mutex::new(FileState { file, size }),
        })
    }

    /// Remove rotated files older than `max_age`; zero keeps them regardless
    /// of age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = (!max_age.is_zero()).then_some(max_age);
        self
    }

    /// Prefix every line with a local timestamp
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Current size of the live file
    pub fn size(&self) -> u64 {
        self.state.lock().map(|s| s.size).unwrap_or(0)
    }

    fn append(&self, line: &str) -> Result<()> {
        let entry = self.format_entry(&Local::now(), line);
        let mut state = self
            .state
            .lock()
            .map_err(|_| WardenError::LogFile("log file lock poisoned".to_string()))?;

        if state.size >= self.max_size {
            self.rotate()?;
            state.file = open_append(&self.path)?;
            state.size = 0;
        }

        state.file.write_all(&entry)?;
        state.file.flush()?;
        state.size += entry.len() as u64;

        Ok(())
    }

    fn format_entry(&self, timestamp: &DateTime<Local>, line: &str) -> Vec<u8> {
        let mut entry = Vec::with_capacity(line.len() + 32);

        // Format: [YYYY-MM-DD HH:MM:SS.mmm] <line>
        if self.timestamps {
            entry.extend_from_slice(b"[");
            entry.extend_from_slice(timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string().as_bytes());
            entry.extend_from_slice(b"] ");
        }
        entry.extend_from_slice(line.as_bytes());
        entry.push(b'\n');

        entry
    }

    /// Rename the live file with a timestamp, then drop the oldest backups
    fn rotate(&self) -> Result<()> {
        let (parent, stem) = self.split_path()?;
        let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let rotated = parent.join(format!("{}-{}.log", stem, timestamp));

        std::fs::rename(&self.path, &rotated)
            .map_err(|e| WardenError::LogRotation(format!("Failed to rotate log: {}", e)))?;

        self.prune_backups(&parent, &stem)
    }

    fn prune_backups(&self, parent: &Path, stem: &str) -> Result<()> {
        let prefix = format!("{}-", stem);
        let live = self.path.file_name();

        let mut backups: Vec<PathBuf> = std::fs::read_dir(parent)
            .map_err(|e| WardenError::LogRotation(format!("Failed to list log dir: {}", e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.file_name() != live)
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".log"))
                    .unwrap_or(false)
            })
            .collect();

        // Timestamps sort lexically, oldest first
        backups.sort();
        let (expired, kept): (Vec<PathBuf>, Vec<PathBuf>) =
            backups.into_iter().partition(|p| self.is_expired(p));

        let excess = kept.len().saturating_sub(self.max_backups);
        for old in expired.iter().chain(kept.iter().take(excess)) {
            if let Err(e) = std::fs::remove_file(old) {
                warn!("Failed to remove old log {}: {}", old.display(), e);
            }
        }

        Ok(())
    }

    fn is_expired(&self, backup: &Path) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        std::fs::metadata(backup)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map_or(false, |age| age > max_age)
    }

    fn split_path(&self) -> Result<(PathBuf, String)> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WardenError::LogRotation("Invalid log file name".to_string()))?
            .to_string();
        Ok((parent, stem))
    }
}

impl LineSink for FileSink {
    fn write_line(&self, line: &str) {
        if let Err(e) = self.append(line) {
            warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WardenError::LogFile(format!("Failed to open {}: {}", path.display(), e)))
}
