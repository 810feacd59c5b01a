//! File-backed device directory with a process-lifetime cache.

use std::path::PathBuf;

use parking_lot::Mutex;
use regex::Regex;

use crate::core::errors::{Result, ScanError};
use crate::scan::DeviceDirectory;

/// Reads the fleet from a hostname-per-line file, uppercases, filters on
/// the configured device pattern, and caches the result until invalidated.
pub struct FileDirectory {
    path: PathBuf,
    pattern: Regex,
    cache: Mutex<Option<Vec<String>>>,
}

impl FileDirectory {
    pub fn new(path: PathBuf, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|err| ScanError::InvalidConfig {
            details: format!("device pattern is not a valid regex: {err}"),
        })?;
        Ok(Self {
            path,
            pattern,
            cache: Mutex::new(None),
        })
    }

    /// Drop the cache; the next `list_devices` re-reads the file.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn load(&self) -> Result<Vec<String>> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ScanError::Directory {
            details: format!("cannot read {}: {source}", self.path.display()),
        })?;

        let mut devices = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let hostname = line.to_ascii_uppercase();
            if self.pattern.is_match(&hostname) && !devices.contains(&hostname) {
                devices.push(hostname);
            }
        }
        Ok(devices)
    }
}

impl DeviceDirectory for FileDirectory {
    fn list_devices(&self) -> Result<Vec<String>> {
        let mut cache = self.cache.lock();
        if let Some(devices) = cache.as_ref() {
            return Ok(devices.clone());
        }
        let devices = self.load()?;
        eprintln!(
            "[MODSCAN-DIRECTORY] cached {} devices from {}",
            devices.len(),
            self.path.display()
        );
        *cache = Some(devices.clone());
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: &str = r"CCAP[012]\d{2}";

    #[test]
    fn filters_uppercases_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.txt");
        std::fs::write(
            &path,
            "# fleet list\nccap001\nCCAP001\nCCAP142\nedge-router-1\nCCAP903\n\n",
        )
        .unwrap();

        let directory = FileDirectory::new(path, PATTERN).unwrap();
        let devices = directory.list_devices().unwrap();
        assert_eq!(devices, vec!["CCAP001", "CCAP142"]);
    }

    #[test]
    fn cache_survives_file_changes_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.txt");
        std::fs::write(&path, "CCAP001\n").unwrap();

        let directory = FileDirectory::new(path.clone(), PATTERN).unwrap();
        assert_eq!(directory.list_devices().unwrap().len(), 1);

        std::fs::write(&path, "CCAP001\nCCAP002\n").unwrap();
        assert_eq!(directory.list_devices().unwrap().len(), 1);

        directory.invalidate();
        assert_eq!(directory.list_devices().unwrap().len(), 2);
    }

    #[test]
    fn missing_file_is_a_directory_error() {
        let directory =
            FileDirectory::new(PathBuf::from("/nonexistent/devices.txt"), PATTERN).unwrap();
        let err = directory.list_devices().unwrap_err();
        assert_eq!(err.code(), "MS-3002");
    }
}
