//! File writer with size-based rollover

use crate::logger::config::FileConfig;
use crate::logger::error::LoggerError;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Appending log file writer.
///
/// Once the file grows past `max_size` it is renamed to `<path>.1`, older
/// backups shift up by one and anything beyond `max_files` is removed.
#[derive(Clone)]
pub struct RotatingFileWriter {
    state: Arc<Mutex<WriterState>>,
    path: PathBuf,
    max_size: u64,
    max_files: usize,
}

struct WriterState {
    file: BufWriter<File>,
    current_size: u64,
    /// Set after an unrecoverable write error; output goes to stderr instead
    fallback_mode: bool,
}

impl RotatingFileWriter {
    pub fn new(config: &FileConfig) -> Result<Self, LoggerError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = open_log_file(&config.path, config.append)?;
        let current_size = if config.append {
            std::fs::metadata(&config.path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            state: Arc::new(Mutex::new(WriterState {
                file,
                current_size,
                fallback_mode: false,
            })),
            path: config.path.clone(),
            max_size: config.max_size,
            max_files: config.max_files,
        })
    }

    /// Check if the writer is currently writing to stderr
    pub fn is_in_fallback_mode(&self) -> bool {
        self.state.lock().map(|s| s.fallback_mode).unwrap_or(false)
    }

    fn roll_over(&self, state: &mut WriterState) -> Result<(), LoggerError> {
        state.file.flush()?;
        shift_backups(&self.path, self.max_files)?;
        state.file = open_log_file(&self.path, false)?;
        state.current_size = 0;
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriterGuard {
            writer: self.clone(),
        }
    }
}

/// Per-event writer handed out to `tracing-subscriber`
pub struct RotatingWriterGuard {
    writer: RotatingFileWriter,
}

impl Write for RotatingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .writer
            .state
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire writer lock"))?;

        if state.fallback_mode {
            return io::stderr().write(buf);
        }

        if self.writer.max_size > 0
            && state.current_size + buf.len() as u64 > self.writer.max_size
            && state.current_size > 0
            && let Err(e) = self.writer.roll_over(&mut state)
        {
            state.fallback_mode = true;
            eprintln!("[Logger] Log rollover failed, falling back to stderr: {}", e);
            return io::stderr().write(buf);
        }

        match state.file.write(buf) {
            Ok(written) => {
                state.current_size += written as u64;
                Ok(written)
            }
            Err(e) => {
                state.fallback_mode = true;
                eprintln!("[Logger] File write failed, falling back to stderr: {}", e);
                io::stderr().write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .writer
            .state
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire writer lock"))?;

        if state.fallback_mode {
            return io::stderr().flush();
        }

        state.file.flush()
    }
}

impl Drop for RotatingWriterGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.writer.state.lock() {
            let _ = state.file.flush();
        }
    }
}

fn open_log_file(path: &Path, append: bool) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;

    Ok(BufWriter::new(file))
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Shift `<path>.N` to `<path>.N+1`, dropping the oldest, then move the live file to `.1`
fn shift_backups(path: &Path, max_files: usize) -> Result<(), LoggerError> {
    let oldest = backup_path(path, max_files);
    if oldest.exists() {
        std::fs::remove_file(&oldest)
            .map_err(|e| LoggerError::rollover(format!("remove {}: {}", oldest.display(), e)))?;
    }

    for index in (1..max_files).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            let to = backup_path(path, index + 1);
            std::fs::rename(&from, &to).map_err(|e| {
                LoggerError::rollover(format!("rename {}: {}", from.display(), e))
            })?;
        }
    }

    if path.exists() {
        std::fs::rename(path, backup_path(path, 1))
            .map_err(|e| LoggerError::rollover(format!("rename {}: {}", path.display(), e)))?;
    }

    Ok(())
}
