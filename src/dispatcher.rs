//! Connection dispatcher (C6)
//!
//! A single accept loop hands each connection to its own worker thread.
//! Grounded on the teacher's `main.rs` (`TcpListener` + `thread::spawn` per
//! connection) and `original_source/src/zerotermd/server.py`
//! (`run_server`, `_handle_client`, `_is_websocket_request`).

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bridge;
use crate::config::Config;
use crate::error::HandshakeError;
use crate::http::{self, HttpRequest};
use crate::registry::{AttachOutcome, Registry};
use crate::static_files;
use crate::ws;

const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(config: Arc<Config>, registry: Arc<Registry>) -> std::io::Result<()> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port))?;
    info!("zerotermd listening on {}:{}", config.bind, config.port);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("failed to accept connection: {err}");
                continue;
            }
        };
        let config = Arc::clone(&config);
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            if let Err(err) = handle_connection(stream, &config, &registry) {
                warn!("connection worker error: {err}");
            }
        });
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    config: &Config,
    registry: &Registry,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(HANDSHAKE_READ_TIMEOUT))?;

    let request = match http::read_http_request(
        &mut stream,
        http::DEFAULT_MAX_HEADER_BYTES,
        http::DEFAULT_MAX_BODY_BYTES,
    )? {
        Some(request) => request,
        None => return Ok(()),
    };

    if is_websocket_upgrade(&request) {
        // Spec: "Non-/ws with Upgrade -> 404"; /ws with a non-GET method
        // falls through to the ordinary 405 below.
        if request.path() != "/ws" {
            return http::send_text(&mut stream, 404, "Not Found");
        }
        if request.method == "GET" {
            return handle_websocket_upgrade(stream, &request, config, registry);
        }
        return http::send_text(&mut stream, 405, "Method Not Allowed");
    }

    if request.method == "GET" {
        return static_files::serve_static(&mut stream, request.path(), &config.static_dir);
    }

    http::send_text(&mut stream, 405, "Method Not Allowed")
}

fn is_websocket_upgrade(request: &HttpRequest) -> bool {
    let upgrade = request
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let connection_has_upgrade = request
        .header("connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    upgrade && connection_has_upgrade
}

/// `[A-Za-z0-9_-]{1,64}`, matching spec.md section 3. Anything else means
/// the connection is anonymous (non-resumable), not an error.
fn sanitize_session_id(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.len() > 64 {
        return None;
    }
    if raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Some(raw.to_string())
    } else {
        None
    }
}

/// Validates the headers the handshake needs beyond the generic upgrade
/// check already performed by `is_websocket_upgrade`.
fn validate_handshake(request: &HttpRequest) -> Result<String, HandshakeError> {
    if request.header("sec-websocket-version") != Some("13") {
        return Err(HandshakeError::UnsupportedVersion);
    }
    request
        .header("sec-websocket-key")
        .map(str::to_string)
        .ok_or(HandshakeError::MissingKey)
}

fn extract_session_id(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "session" {
                return sanitize_session_id(value);
            }
        }
    }
    None
}

/// Resolves the session id a connection should attach with. Spec 4.5: "with
/// id null or resume disabled, spawn a new PTY and return a non-persistent
/// record" — with resume off, a supplied `session` query param is ignored
/// and every connection is anonymous.
fn resolve_session_id(query: Option<&str>, resume_enabled: bool) -> Option<String> {
    if !resume_enabled {
        return None;
    }
    extract_session_id(query)
}

fn handle_websocket_upgrade(
    mut stream: TcpStream,
    request: &HttpRequest,
    config: &Config,
    registry: &Registry,
) -> std::io::Result<()> {
    // Spec 4.6: extract session id, pre-sweep, reject 409 if busy, *then*
    // perform the handshake, then hand off to the bridge.
    let session_id = resolve_session_id(request.query(), config.session_resume);
    if config.session_resume {
        registry.sweep(Duration::from_secs(config.session_ttl));
    }

    let handle = match registry.attach_or_create(session_id.as_deref(), config) {
        Ok(AttachOutcome::Ready(handle)) => handle,
        Ok(AttachOutcome::Busy) => {
            return http::send_text(&mut stream, 409, "Session Busy");
        }
        Err(err) => {
            error!("PTY spawn failed: {err}");
            return http::send_text(&mut stream, 500, "Internal Server Error");
        }
    };

    let key = match validate_handshake(request) {
        Ok(key) => key,
        Err(err) => {
            warn!("rejecting WebSocket handshake: {err}");
            registry.finalize(handle);
            return http::send_text(&mut stream, 400, "Bad Request");
        }
    };

    let accept_key = ws::derive_accept_key(&key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept_key}\r\n\r\n"
    );
    if let Err(err) = std::io::Write::write_all(&mut stream, response.as_bytes()) {
        warn!("handshake write failed: {err}");
        registry.finalize(handle);
        return Err(err);
    }

    stream.set_read_timeout(None)?;
    info!(
        "WebSocket attached: session={:?} pid={}",
        handle.id,
        handle.pid.as_raw()
    );
    bridge::run(stream, handle, registry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_valid_ids() {
        assert_eq!(
            sanitize_session_id("abc-123_DEF"),
            Some("abc-123_DEF".to_string())
        );
    }

    #[test]
    fn sanitize_rejects_invalid_ids() {
        assert_eq!(sanitize_session_id("bad id"), None);
        assert_eq!(sanitize_session_id("bad!"), None);
        assert_eq!(sanitize_session_id(""), None);
        assert_eq!(sanitize_session_id(&"a".repeat(65)), None);
        assert_eq!(sanitize_session_id(&"a".repeat(64)), Some("a".repeat(64)));
    }

    #[test]
    fn extract_session_id_reads_query_param() {
        assert_eq!(
            extract_session_id(Some("session=abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(extract_session_id(Some("other=1")), None);
        assert_eq!(extract_session_id(None), None);
    }

    #[test]
    fn extract_session_id_rejects_malformed_token() {
        assert_eq!(extract_session_id(Some("session=bad id")), None);
    }

    #[test]
    fn resolve_session_id_ignores_query_when_resume_disabled() {
        assert_eq!(resolve_session_id(Some("session=abc123"), false), None);
    }

    #[test]
    fn resolve_session_id_honors_query_when_resume_enabled() {
        assert_eq!(
            resolve_session_id(Some("session=abc123"), true),
            Some("abc123".to_string())
        );
    }

    fn request_with_headers(headers: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            target: "/ws".into(),
            version: "HTTP/1.1".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn validate_handshake_accepts_well_formed_headers() {
        let request = request_with_headers(&[
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-version", "13"),
        ]);
        assert_eq!(
            validate_handshake(&request).ok().as_deref(),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }

    #[test]
    fn validate_handshake_rejects_missing_key() {
        let request = request_with_headers(&[("sec-websocket-version", "13")]);
        assert!(matches!(
            validate_handshake(&request),
            Err(HandshakeError::MissingKey)
        ));
    }

    #[test]
    fn validate_handshake_rejects_wrong_version() {
        let request = request_with_headers(&[
            ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("sec-websocket-version", "8"),
        ]);
        assert!(matches!(
            validate_handshake(&request),
            Err(HandshakeError::UnsupportedVersion)
        ));
    }
}
