use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default name of the log file created inside the configured directory.
pub const DEFAULT_LOG_FILE: &str = "log.wal";

/// How the log file is flushed after every appended record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// `fsync`: file content and metadata.
    #[default]
    All,
    /// `fdatasync`: file content only.
    Data,
}

/// Configuration for opening a [`crate::Wal`] backed by a file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalConfig {
    /// Directory the log file lives in. It must already exist.
    pub dir: PathBuf,
    /// File name of the log inside `dir`.
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Flush discipline applied after each record.
    #[serde(default)]
    pub sync: SyncMode,
}

fn default_file_name() -> String {
    DEFAULT_LOG_FILE.to_string()
}

impl WalConfig {
    /// Creates a config for `dir` with the default file name and `SyncMode::All`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: default_file_name(),
            sync: SyncMode::default(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Full path of the log file.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
