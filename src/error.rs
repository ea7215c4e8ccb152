//! Error types
//!
//! One `thiserror` enum per seam that can fail independently: the WebSocket
//! codec, the handshake, the PTY primitive and the session registry. Callers
//! that only need a process-level failure path (`main`) collapse these into
//! `anyhow::Error` with `?`.

use thiserror::Error;

/// Errors from frame decoding / continuation reassembly (C1).
#[derive(Debug, Error)]
pub enum WsError {
    #[error("frame buffer exceeded {0} bytes")]
    BufferOverflow(usize),
    #[error("malformed frame: {0}")]
    Protocol(&'static str),
}

/// Errors from the opening handshake (C1).
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("unsupported Sec-WebSocket-Version (want 13)")]
    UnsupportedVersion,
}

/// Errors from spawning or controlling a PTY-backed shell (C4).
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("openpty/fork failed: {0}")]
    Spawn(#[source] nix::Error),
    #[error("exec failed: {0}")]
    Exec(#[source] nix::Error),
}
