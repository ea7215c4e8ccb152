//! Child lifecycle (C8)
//!
//! Escalating HUP -> TERM -> KILL teardown with bounded waits, and a
//! non-blocking reap check used by the registry's `finalize`/`sweep`.
//! Grounded on spec.md 4.8 and the escalating-signal shape of
//! `examples/other_examples/9a392626_jguida941-voiceterm__.../pty.rs`
//! (`shutdown_pty_child`).

use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, Pid};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SIGNAL_WAIT: Duration = Duration::from_millis(500);

/// Non-blocking check: has `pid` already been reaped (exited and waited)?
/// `ECHILD` (no such child — already waited by someone, or never ours)
/// counts as reaped.
pub fn try_wait(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(_) => true,
        Err(nix::Error::ECHILD) => true,
        Err(err) => {
            warn!("waitpid({pid}) failed: {err}");
            false
        }
    }
}

fn wait_for_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if try_wait(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn signal_ignoring_absent(pid: Pid, signal: Signal) {
    match kill(pid, signal) {
        Ok(()) | Err(nix::Error::ESRCH) => {}
        Err(err) => warn!("failed to send {signal} to {pid}: {err}"),
    }
}

/// Closes `master_fd`, then reaps `pid`: a non-blocking wait first, and if
/// that doesn't find it already dead, HUP, wait up to 500ms, TERM, wait up
/// to 500ms, KILL, wait up to 500ms. `ProcessNotFound` at any step counts as
/// success, matching spec.md 4.8.
pub fn reap(pid: Pid, master_fd: i32) {
    if let Err(err) = close(master_fd) {
        warn!("failed to close PTY master fd {master_fd}: {err}");
    }

    if try_wait(pid) {
        return;
    }

    for signal in [Signal::SIGHUP, Signal::SIGTERM, Signal::SIGKILL] {
        signal_ignoring_absent(pid, signal);
        if wait_for_exit(pid, SIGNAL_WAIT) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_wait_on_nonexistent_pid_counts_as_reaped() {
        // A pid this process never forked is always ECHILD under waitpid.
        assert!(try_wait(Pid::from_raw(i32::MAX - 1)));
    }
}
