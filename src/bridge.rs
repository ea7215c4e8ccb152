//! Bridge (C7)
//!
//! The duplex byte pump between an attached WebSocket and a PTY master fd.
//! Two threads share a cancellation flag: one pumps socket -> PTY (and
//! handles resize/ping/close control), the other pumps PTY -> socket using
//! a bounded-timeout readiness poll so it notices cancellation promptly.
//! Ported from `original_source/src/zerotermd/server.py`
//! (`_run_ws_session`, `_handle_text_message`) into the teacher's thread
//! idiom.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read as pty_read, write as pty_write};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::pty;
use crate::registry::Handle;
use crate::ws::{self, FrameDecoder, Message};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;
const PTY_READ_TIMEOUT: Duration = Duration::from_millis(500);
const PTY_READ_CHUNK: usize = 4096;
const SOCKET_READ_CHUNK: usize = 4096;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlMessage {
    Resize { cols: i64, rows: i64 },
    #[serde(other)]
    Unknown,
}

/// Runs a bridge to completion: blocks until either side closes, the PTY
/// hits EOF, or a fatal frame-decode error occurs. Always calls
/// `registry.finalize` before returning, matching spec 4.7's termination
/// rule ("When either half raises cancellation, both halves exit; the
/// bridge calls C5 finalize").
pub fn run(stream: TcpStream, handle: Handle, registry: &crate::registry::Registry) {
    pty::resize(handle.master_fd, handle.pid, DEFAULT_ROWS, DEFAULT_COLS);

    let cancel = Arc::new(AtomicBool::new(false));
    let writer = Arc::new(Mutex::new(match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            warn!("failed to clone bridge socket: {err}");
            registry.finalize(handle);
            return;
        }
    }));
    let shutdown_handle = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            warn!("failed to clone bridge socket: {err}");
            registry.finalize(handle);
            return;
        }
    };

    let log_file = handle.log_path.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| warn!("failed to open session log {path:?}: {err}"))
            .ok()
    });

    let pid = handle.pid;
    let master_fd = handle.master_fd;

    let socket_to_pty = {
        let cancel = Arc::clone(&cancel);
        let writer = Arc::clone(&writer);
        thread::spawn(move || socket_to_pty_loop(stream, writer, master_fd, pid, cancel))
    };

    let pty_to_socket = {
        let cancel = Arc::clone(&cancel);
        let writer = Arc::clone(&writer);
        thread::spawn(move || {
            pty_to_socket_loop(master_fd, writer, log_file, cancel, shutdown_handle)
        })
    };

    let _ = socket_to_pty.join();
    let _ = pty_to_socket.join();

    registry.finalize(handle);
}

fn socket_to_pty_loop(
    mut stream: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    master_fd: i32,
    pid: nix::unistd::Pid,
    cancel: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::default();
    let mut buf = [0u8; SOCKET_READ_CHUNK];

    while !cancel.load(Ordering::SeqCst) {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };

        let messages = match decoder.feed(&buf[..n]) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("frame decode error, closing bridge: {err}");
                send_close(&writer);
                break;
            }
        };

        let mut should_stop = false;
        for message in messages {
            match message {
                Message::Binary(payload) => {
                    if let Err(err) = write_all_to_pty(master_fd, &payload) {
                        debug!("PTY write failed, treating as EOF: {err}");
                        should_stop = true;
                        break;
                    }
                }
                Message::Text(payload) => handle_control_message(&payload, master_fd, pid),
                Message::Ping(payload) => {
                    let mut w = writer.lock().unwrap();
                    let _ = w.write_all(&ws::build_pong_frame(&payload));
                }
                Message::Close(_) => {
                    send_close(&writer);
                    should_stop = true;
                    break;
                }
                Message::Pong(_) => {}
            }
        }
        if should_stop {
            break;
        }
    }
    cancel.store(true, Ordering::SeqCst);
}

fn send_close(writer: &Arc<Mutex<TcpStream>>) {
    let mut w = writer.lock().unwrap();
    let _ = w.write_all(&ws::build_close_frame());
}

fn handle_control_message(payload: &[u8], master_fd: i32, pid: nix::unistd::Pid) {
    let message: ControlMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(_) => return,
    };
    if let ControlMessage::Resize { cols, rows } = message {
        if cols > 0 && rows > 0 && cols <= u16::MAX as i64 && rows <= u16::MAX as i64 {
            pty::resize(master_fd, pid, rows as u16, cols as u16);
        }
    }
}

fn write_all_to_pty(master_fd: i32, data: &[u8]) -> nix::Result<()> {
    let mut written = 0;
    while written < data.len() {
        let n = pty_write(master_fd, &data[written..])?;
        if n == 0 {
            return Err(nix::Error::EIO);
        }
        written += n;
    }
    Ok(())
}

fn pty_to_socket_loop(
    master_fd: i32,
    writer: Arc<Mutex<TcpStream>>,
    mut log_file: Option<File>,
    cancel: Arc<AtomicBool>,
    shutdown_handle: TcpStream,
) {
    let mut buf = [0u8; PTY_READ_CHUNK];

    while !cancel.load(Ordering::SeqCst) {
        let mut poll_fd = [PollFd::new(master_fd, PollFlags::POLLIN)];
        match poll(&mut poll_fd, PTY_READ_TIMEOUT.as_millis() as i32) {
            Ok(0) => continue, // timeout: re-check cancellation flag
            Ok(_) => {}
            Err(nix::Error::EINTR) => continue,
            Err(err) => {
                warn!("poll on PTY master failed: {err}");
                break;
            }
        }

        let n = match pty_read(master_fd, &mut buf) {
            Ok(0) => break, // EOF
            Ok(n) => n,
            Err(nix::Error::EAGAIN) | Err(nix::Error::EINTR) => continue,
            Err(_) => break,
        };

        let frame = ws::build_binary_frame(&buf[..n]);
        {
            let mut w = writer.lock().unwrap();
            if w.write_all(&frame).is_err() {
                break;
            }
        }
        if let Some(file) = log_file.as_mut() {
            if let Err(err) = file.write_all(&buf[..n]) {
                warn!("session log write failed, continuing without logging: {err}");
                log_file = None;
            }
        }
    }
    cancel.store(true, Ordering::SeqCst);
    let _ = shutdown_handle.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_control_message_parses() {
        let payload = br#"{"type":"resize","cols":100,"rows":40}"#;
        let message: ControlMessage = serde_json::from_slice(payload).unwrap();
        match message {
            ControlMessage::Resize { cols, rows } => {
                assert_eq!(cols, 100);
                assert_eq!(rows, 40);
            }
            ControlMessage::Unknown => panic!("expected resize"),
        }
    }

    #[test]
    fn unknown_control_message_is_ignored() {
        let payload = br#"{"type":"ping-extra","value":1}"#;
        let message: ControlMessage = serde_json::from_slice(payload).unwrap();
        assert!(matches!(message, ControlMessage::Unknown));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let payload = b"not json";
        let result: Result<ControlMessage, _> = serde_json::from_slice(payload);
        assert!(result.is_err());
    }
}
