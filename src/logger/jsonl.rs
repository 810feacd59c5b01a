//! Append-only JSONL activity log with size-based rotation.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::core::errors::{Result, ScanError};

/// Where and how the JSONL log is written.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub max_size_bytes: u64,
    pub max_rotated_files: usize,
}

impl JsonlConfig {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

/// Appends serialized events one line at a time, rotating when the file
/// grows past the configured cap.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: File,
    written: u64,
}

impl JsonlWriter {
    pub fn open(config: JsonlConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ScanError::io(parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .map_err(|source| ScanError::io(&config.path, source))?;
        let written = file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| ScanError::io(&config.path, source))?;
        Ok(Self {
            config,
            file,
            written,
        })
    }

    pub fn append(&mut self, line: &str) -> Result<()> {
        if self.written > self.config.max_size_bytes {
            self.rotate()?;
        }
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.write_all(b"\n"))
            .map_err(|source| ScanError::io(&self.config.path, source))?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|source| ScanError::io(&self.config.path, source))
    }

    /// Shift `path.N` up by one, dropping the oldest, then reopen fresh.
    fn rotate(&mut self) -> Result<()> {
        let path = &self.config.path;
        for index in (1..self.config.max_rotated_files).rev() {
            let from = rotated_path(path, index);
            if from.exists() {
                let _ = std::fs::rename(&from, rotated_path(path, index + 1));
            }
        }
        let _ = std::fs::rename(path, rotated_path(path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ScanError::io(path, source))?;
        self.written = 0;
        Ok(())
    }
}

fn rotated_path(path: &std::path::Path, index: usize) -> PathBuf {
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(format!(".{index}"));
    PathBuf::from(rotated)
}
