//! Cooperative shutdown flag driven by SIGINT/SIGTERM.
//!
//! The flag is checked at loop boundaries and sleep sub-intervals, never
//! acted on asynchronously: in-flight device tasks finish naturally and the
//! daemon refuses to start a new cycle once the flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{Result, ScanError};

/// Shared shutdown-requested flag.
#[derive(Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Register SIGINT and SIGTERM to raise the flag.
    pub fn install() -> Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&flag)).map_err(|source| {
                ScanError::Runtime {
                    details: format!("failed to register signal handler: {source}"),
                }
            })?;
        }
        Ok(Self { flag })
    }

    /// A flag without signal wiring, raised only by `request()`. For tests
    /// and embedding.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Raise the flag programmatically.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_flag_toggles_once() {
        let flag = ShutdownFlag::manual();
        assert!(!flag.is_set());
        flag.request();
        assert!(flag.is_set());
        // Clones observe the same state.
        let clone = flag.clone();
        assert!(clone.is_set());
    }
}
