//! Session registry (C5)
//!
//! Named-session table with at-most-one attachment and detach-retention
//! TTL. Grounded on spec.md section 4.5; the shared-map-with-mutex shape
//! follows `examples/other_examples/5387a194_citadelgrad-.../terminal.rs`
//! (`TerminalSessions`), adapted from that file's async/`tokio` setting into
//! the teacher's std-thread model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PtyError;
use crate::lifecycle;
use crate::pty;

struct SessionRecord {
    pid: Pid,
    master_fd: i32,
    attached: bool,
    last_detach: Instant,
    log_path: Option<PathBuf>,
}

/// A session handed to a bridge: either a fresh, non-resumable anonymous
/// session or a named one the registry now holds `attached=true` for.
pub struct Handle {
    pub id: Option<String>,
    pub pid: Pid,
    pub master_fd: i32,
    pub persistent: bool,
    pub log_path: Option<PathBuf>,
}

pub enum AttachOutcome {
    Ready(Handle),
    Busy,
}

#[derive(Default)]
pub struct Registry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

fn make_log_path(config: &Config, id_label: &str, pid: Pid) -> Option<PathBuf> {
    let dir = config.session_log_dir.as_ref()?;
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Some(dir.join(format!(
        "zeroterm-session-{timestamp}-{id_label}-{}.log",
        pid.as_raw()
    )))
}

fn spawn_shell(config: &Config) -> Result<pty::Spawned, PtyError> {
    pty::spawn(
        &config.shell,
        config.shell_cmd.as_deref(),
        &config.term,
        config.cwd.as_deref(),
    )
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Attaches to (or creates) the session named `id`, or spawns a fresh,
    /// non-persistent session when `id` is `None`. Enforces at-most-one
    /// attachment: the busy check and the attach flip happen under the same
    /// lock, but the actual fork+exec happens with the lock released so one
    /// slow spawn never blocks other sessions; a reconciliation step after
    /// re-acquiring the lock resolves any race against a concurrent
    /// attacher for the same id.
    pub fn attach_or_create(
        &self,
        id: Option<&str>,
        config: &Config,
    ) -> Result<AttachOutcome, PtyError> {
        let Some(id) = id else {
            let spawned = spawn_shell(config)?;
            return Ok(AttachOutcome::Ready(Handle {
                id: None,
                pid: spawned.pid,
                master_fd: spawned.master_fd,
                persistent: false,
                log_path: make_log_path(config, "anonymous", spawned.pid),
            }));
        };

        {
            let mut sessions = self.sessions.lock().unwrap();
            if let Some(record) = sessions.get_mut(id) {
                if record.attached {
                    return Ok(AttachOutcome::Busy);
                }
                record.attached = true;
                return Ok(AttachOutcome::Ready(Handle {
                    id: Some(id.to_string()),
                    pid: record.pid,
                    master_fd: record.master_fd,
                    persistent: true,
                    log_path: record.log_path.clone(),
                }));
            }
        }

        // No existing record: spawn outside the lock, then reconcile.
        let spawned = spawn_shell(config)?;
        let log_path = make_log_path(config, id, spawned.pid);

        let mut sessions = self.sessions.lock().unwrap();
        if let Some(record) = sessions.get_mut(id) {
            // Another attacher won the race while we were spawning.
            let outcome = if record.attached {
                AttachOutcome::Busy
            } else {
                record.attached = true;
                AttachOutcome::Ready(Handle {
                    id: Some(id.to_string()),
                    pid: record.pid,
                    master_fd: record.master_fd,
                    persistent: true,
                    log_path: record.log_path.clone(),
                })
            };
            drop(sessions);
            info!("discarding redundant PTY spawned for session {id} after attach race");
            lifecycle::reap(spawned.pid, spawned.master_fd);
            return Ok(outcome);
        }

        sessions.insert(
            id.to_string(),
            SessionRecord {
                pid: spawned.pid,
                master_fd: spawned.master_fd,
                attached: true,
                last_detach: Instant::now(),
                log_path: log_path.clone(),
            },
        );
        Ok(AttachOutcome::Ready(Handle {
            id: Some(id.to_string()),
            pid: spawned.pid,
            master_fd: spawned.master_fd,
            persistent: true,
            log_path,
        }))
    }

    /// Called once a bridge ends. Non-persistent handles are always reaped.
    /// Persistent handles whose child already died are reaped and removed;
    /// otherwise the record is marked detached with `last_detach = now`.
    pub fn finalize(&self, handle: Handle) {
        if !handle.persistent {
            lifecycle::reap(handle.pid, handle.master_fd);
            return;
        }
        let id = handle
            .id
            .expect("persistent handles always carry a session id");

        if lifecycle::try_wait(handle.pid) {
            lifecycle::reap(handle.pid, handle.master_fd);
            self.sessions.lock().unwrap().remove(&id);
            return;
        }

        let mut sessions = self.sessions.lock().unwrap();
        if let Some(record) = sessions.get_mut(&id) {
            record.attached = false;
            record.last_detach = Instant::now();
        } else {
            warn!("finalize for unknown session {id}; treating as non-persistent");
            lifecycle::reap(handle.pid, handle.master_fd);
        }
    }

    /// Tombstones every detached record whose retention has expired.
    /// `ttl == 0` disables sweeping entirely (spec 8: "TTL=0 disables
    /// sweeping") rather than tombstoning everything on the next pass.
    pub fn sweep(&self, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let expired = {
            let mut sessions = self.sessions.lock().unwrap();
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, record)| {
                    !record.attached && now.duration_since(record.last_detach) >= ttl
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|record| (id, record)))
                .collect::<Vec<_>>()
        };
        for (id, record) in expired {
            info!("sweeping expired session {id}");
            lifecycle::reap(record.pid, record.master_fd);
        }
    }

    #[cfg(test)]
    fn is_attached(&self, id: &str) -> Option<bool> {
        self.sessions.lock().unwrap().get(id).map(|r| r.attached)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            bind: "127.0.0.1".into(),
            port: 0,
            shell: "/bin/true".into(),
            shell_cmd: None,
            term: "linux".into(),
            cwd: None,
            log_level: "error".into(),
            static_dir: std::env::temp_dir(),
            session_log_dir: None,
            session_resume: true,
            session_ttl: 60,
        }
    }

    // These tests exercise the pure bookkeeping paths (busy detection,
    // finalize/sweep transitions) against synthetic records rather than
    // real forked children, since spawning a shell isn't hermetic in a
    // test sandbox. attach_or_create's fork/exec path is covered by the
    // manual end-to-end scenarios in spec.md section 8.

    #[test]
    fn sweep_with_zero_ttl_is_a_no_op() {
        let registry = Registry::new();
        registry.sessions.lock().unwrap().insert(
            "sess".into(),
            SessionRecord {
                pid: Pid::from_raw(i32::MAX - 1),
                master_fd: -1,
                attached: false,
                last_detach: Instant::now() - Duration::from_secs(3600),
                log_path: None,
            },
        );
        registry.sweep(Duration::ZERO);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sweep_removes_expired_detached_sessions() {
        let registry = Registry::new();
        registry.sessions.lock().unwrap().insert(
            "sess".into(),
            SessionRecord {
                pid: Pid::from_raw(i32::MAX - 1),
                master_fd: -1,
                attached: false,
                last_detach: Instant::now() - Duration::from_secs(120),
                log_path: None,
            },
        );
        registry.sweep(Duration::from_secs(60));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sweep_leaves_attached_sessions_alone() {
        let registry = Registry::new();
        registry.sessions.lock().unwrap().insert(
            "sess".into(),
            SessionRecord {
                pid: Pid::from_raw(i32::MAX - 1),
                master_fd: -1,
                attached: true,
                last_detach: Instant::now() - Duration::from_secs(120),
                log_path: None,
            },
        );
        registry.sweep(Duration::from_secs(60));
        assert_eq!(registry.is_attached("sess"), Some(true));
    }

    #[test]
    fn finalize_non_persistent_never_touches_the_map() {
        let registry = Registry::new();
        let handle = Handle {
            id: None,
            pid: Pid::from_raw(i32::MAX - 1),
            master_fd: -1,
            persistent: false,
            log_path: None,
        };
        registry.finalize(handle);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn make_log_path_is_none_without_configured_dir() {
        let config = test_config();
        assert!(make_log_path(&config, "sess", Pid::from_raw(1)).is_none());
    }
}
