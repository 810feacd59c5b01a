//! Process liveness probes and signal delivery shared by the lock and the
//! supervisor.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Whether a process with the given pid exists on this host.
///
/// Probes with the null signal. EPERM means the process exists but belongs
/// to another user, which still counts as alive for lock purposes.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Request graceful termination.
pub fn terminate(pid: i32) -> nix::Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM)
}

/// Force-terminate without further ceremony.
pub fn force_kill(pid: i32) -> nix::Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGKILL)
}

/// Poll until the process exits or the deadline passes.
///
/// Returns true if the process is gone.
#[must_use]
pub fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        #[allow(clippy::cast_possible_wrap)]
        let me = std::process::id() as i32;
        assert!(is_alive(me));
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        // Far beyond the default pid_max; kill(2) reports ESRCH.
        assert!(!is_alive(0x3FFF_FFF0));
    }

    #[test]
    fn nonpositive_pids_are_never_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(-1));
    }

    #[test]
    fn wait_for_exit_returns_quickly_for_dead_pid() {
        let start = Instant::now();
        assert!(wait_for_exit(0x3FFF_FFF0, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
