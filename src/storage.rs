use log::trace;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{SyncMode, WalConfig};
use crate::errors::Result;
use crate::record::LogRecord;

/// Trait for the append-only record stream underneath a [`crate::Wal`].
///
/// Implementations are responsible for making every appended record durable
/// before `append` returns. The `Wal` serializes all calls behind a single
/// mutex, so implementations only need to be `Send`; they never see two
/// concurrent appends.
///
/// No corruption detection or recovery is expected from an implementation.
///
/// # Examples
///
/// An in-memory stream, useful for tests:
///
/// ```no_run
/// use occwal::prelude::*;
///
/// #[derive(Default)]
/// struct MemoryStorage {
///     buf: String,
/// }
///
/// impl LogStorage for MemoryStorage {
///     fn append(&mut self, record: &LogRecord) -> Result<()> {
///         self.buf.push_str(&record.to_string());
///         self.buf.push('\n');
///         Ok(())
///     }
///
///     fn snapshot(&self) -> Result<String> {
///         Ok(self.buf.clone())
///     }
/// }
///
/// let wal = Wal::with_storage(Box::new(MemoryStorage::default()));
/// ```
pub trait LogStorage: Send {
    /// Appends one record as a single line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns `WalError::Io` if the write or the flush fails. The caller
    /// treats this as fatal for the transaction that issued the record.
    fn append(&mut self, record: &LogRecord) -> Result<()>;

    /// Returns the full current content of the stream, byte for byte.
    fn snapshot(&self) -> Result<String>;
}

/// A [`LogStorage`] writing to a single file that is created fresh on open.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    file: File,
    sync: SyncMode,
}

impl FileStorage {
    /// Creates (or truncates) the log file described by `config`.
    ///
    /// The directory is not created; a missing directory or missing
    /// permissions surface as `WalError::Io`.
    pub fn create(config: &WalConfig) -> Result<Self> {
        let path = config.log_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        trace!("Opened log file {}", path.display());

        Ok(Self {
            path,
            file,
            sync: config.sync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileStorage {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let line = format!("{}\n", record);
        self.file.write_all(line.as_bytes())?;
        match self.sync {
            SyncMode::All => self.file.sync_all()?,
            SyncMode::Data => self.file.sync_data()?,
        }
        trace!("Appended {:?} to {}", record, self.path.display());
        Ok(())
    }

    fn snapshot(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}
