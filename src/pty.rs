//! PTY session primitive (C4)
//!
//! Fork+exec a login shell attached to a new PTY, and resize it on demand.
//! Ported from `original_source/src/zerotermd/pty_session.py`
//! (`spawn_pty`, `resize_pty`) with the fork/exec/ioctl pattern grounded on
//! `examples/other_examples/9a392626_jguida941-voiceterm__.../pty.rs`.

use std::ffi::CString;

use nix::pty::{forkpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{ForkResult, Pid};
use tracing::warn;

use crate::error::PtyError;

/// A freshly spawned PTY-backed shell: the child's pid and the parent's
/// exclusive handle on the PTY master fd.
pub struct Spawned {
    pub pid: Pid,
    pub master_fd: i32,
}

/// Forks a child connected to a new PTY slave and execs either `shell_cmd`
/// (if given) or `shell` as a login shell (`argv[0] == shell`, single
/// argument `-l`). The parent gets back `(pid, master_fd)`; the child never
/// returns (a failed exec calls `_exit`).
pub fn spawn(
    shell: &str,
    shell_cmd: Option<&[String]>,
    term: &str,
    cwd: Option<&str>,
) -> Result<Spawned, PtyError> {
    let winsize = Winsize {
        ws_row: 24,
        ws_col: 80,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // Build every CString before forking: CString::new can fail (embedded
    // NUL) and the error path must not unwind inside the forked child.
    let term = CString::new(term).map_err(|_| PtyError::Exec(nix::Error::EINVAL))?;
    let cwd = cwd
        .map(CString::new)
        .transpose()
        .map_err(|_| PtyError::Exec(nix::Error::EINVAL))?;
    let argv: Vec<CString> = match shell_cmd.filter(|v| !v.is_empty()) {
        Some(cmd) => cmd
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| PtyError::Exec(nix::Error::EINVAL))?,
        None => {
            let program = CString::new(shell).map_err(|_| PtyError::Exec(nix::Error::EINVAL))?;
            vec![program.clone(), CString::new("-l").unwrap()]
        }
    };

    // SAFETY: between fork and exec the child only touches async-signal-safe
    // APIs (setenv, chdir, exec) with CStrings already built; it never
    // returns to Rust-level control flow that could observe a
    // half-initialized runtime.
    let result = unsafe { forkpty(Some(&winsize), None) }.map_err(PtyError::Spawn)?;

    match result.fork_result {
        ForkResult::Parent { child } => Ok(Spawned {
            pid: child,
            master_fd: result.master,
        }),
        ForkResult::Child => {
            std::env::set_var("TERM", term.to_string_lossy().as_ref());
            if let Some(dir) = cwd.as_ref() {
                let _ = nix::unistd::chdir(dir.as_c_str());
            }

            let exec_result = if shell_cmd.filter(|v| !v.is_empty()).is_some() {
                nix::unistd::execvp(&argv[0], &argv)
            } else {
                nix::unistd::execv(&argv[0], &argv)
            };

            // execv*/execvp only return on failure.
            let err = exec_result.unwrap_err();
            warn!("exec failed in PTY child: {err}");
            std::process::exit(127);
        }
    }
}

/// Sets the PTY's window size and delivers SIGWINCH to the child. Ignores
/// non-positive dimensions; treats "no such process" as a benign race with
/// teardown.
pub fn resize(master_fd: i32, pid: Pid, rows: u16, cols: u16) {
    if rows == 0 || cols == 0 {
        return;
    }
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    if let Err(err) = set_winsize(master_fd, &winsize) {
        warn!("failed to set PTY window size: {err}");
        return;
    }
    match kill(pid, Signal::SIGWINCH) {
        Ok(()) | Err(nix::Error::ESRCH) => {}
        Err(err) => warn!("failed to deliver SIGWINCH to {pid}: {err}"),
    }
}

nix::ioctl_write_ptr_bad!(set_winsize_raw, libc::TIOCSWINSZ, Winsize);

fn set_winsize(master_fd: i32, winsize: &Winsize) -> nix::Result<()> {
    // SAFETY: master_fd is a valid, open PTY master owned by the caller for
    // the duration of this call.
    unsafe { set_winsize_raw(master_fd, winsize as *const Winsize) }.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_ignores_non_positive_dimensions() {
        // Dimensions of 0 must short-circuit before touching the fd/pid at
        // all, so an invalid fd/pid here must not panic or error.
        resize(-1, Pid::from_raw(-1), 0, 80);
        resize(-1, Pid::from_raw(-1), 24, 0);
    }
}
