//! SSH transport: one `ssh` exec per command, batch mode, bounded connect
//! time. Workers suspend only here, on device I/O.

use std::process::Command;
use std::sync::Arc;

use crate::core::errors::{Result, ScanError};
use crate::device::driver::{CommandTransport, DeviceSession};

/// Transport that shells out to the system `ssh` client.
pub struct SshTransport {
    user: Option<String>,
    connect_timeout_secs: u64,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            user: None,
            connect_timeout_secs: 30,
        }
    }
}

impl SshTransport {
    #[must_use]
    pub fn new(user: Option<String>, connect_timeout_secs: u64) -> Self {
        Self {
            user,
            connect_timeout_secs,
        }
    }

    #[must_use]
    pub fn shared(self) -> Arc<dyn CommandTransport> {
        Arc::new(self)
    }
}

impl CommandTransport for SshTransport {
    fn connect(&self, device: &str) -> Result<Box<dyn DeviceSession>> {
        let target = match &self.user {
            Some(user) => format!("{user}@{device}"),
            None => device.to_string(),
        };
        Ok(Box::new(SshSession {
            device: device.to_string(),
            target,
            connect_timeout_secs: self.connect_timeout_secs,
        }))
    }
}

struct SshSession {
    device: String,
    target: String,
    connect_timeout_secs: u64,
}

impl DeviceSession for SshSession {
    fn run(&mut self, command: &str) -> Result<String> {
        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg(&self.target)
            .arg(command)
            .output()
            .map_err(|source| {
                ScanError::device(&self.device, format!("failed to exec ssh: {source}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::device(
                &self.device,
                format!(
                    "command {command:?} failed ({}): {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
