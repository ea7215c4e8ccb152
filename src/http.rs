//! HTTP/1.1 request reader + response writer (C2)
//!
//! Reads exactly one request: start line, headers, and a `Content-Length`
//! bounded body. Ported from `original_source/src/zerotermd/http_utils.py`
//! (`read_http_request`, `send_response`) into the teacher's manual-parsing
//! style — the teacher's own `websocket.rs::connect` only issues a single
//! `read()` call, which this generalizes into a loop bounded by
//! `max_bytes`/`max_body_bytes`.

use std::collections::HashMap;
use std::io::{Read, Write};

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The path portion of `target`, with any `?query` stripped.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// The raw query string (no leading `?`), if any.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }
}

/// Reads one HTTP/1.1 request off `stream`. Returns `Ok(None)` for any
/// malformed start line, an oversize header region, or an oversize body —
/// the dispatcher closes the connection in that case, no error body is sent.
pub fn read_http_request<S: Read>(
    stream: &mut S,
    max_bytes: usize,
    max_body_bytes: usize,
) -> std::io::Result<Option<HttpRequest>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&data) {
            break pos;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        data.extend_from_slice(&chunk[..n]);
        if data.len() > max_bytes {
            return Ok(None);
        }
    };

    let header_bytes = &data[..header_end];
    let mut body = data[header_end + 4..].to_vec();

    let header_text = match std::str::from_utf8(header_bytes) {
        Ok(text) => text,
        Err(_) => return Ok(None),
    };
    let mut lines = header_text.split("\r\n");
    let start_line = match lines.next() {
        Some(line) => line,
        None => return Ok(None),
    };
    let mut parts = start_line.splitn(3, ' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
        _ => return Ok(None),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(
                name.trim().to_ascii_lowercase(),
                value.trim().to_string(),
            );
        }
    }

    if let Some(content_length) = headers.get("content-length") {
        let length: usize = match content_length.parse() {
            Ok(n) => n,
            Err(_) => 0,
        };
        if length > max_body_bytes {
            return Ok(None);
        }
        while body.len() < length {
            let n = stream.read(&mut chunk[..std::cmp::min(chunk.len(), length - body.len())])?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Ok(Some(HttpRequest {
        method,
        target,
        version,
        headers,
        body,
    }))
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

const REASON_PHRASES: &[(u16, &str)] = &[
    (101, "Switching Protocols"),
    (200, "OK"),
    (400, "Bad Request"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (409, "Conflict"),
    (500, "Internal Server Error"),
];

fn reason_phrase(status: u16) -> &'static str {
    REASON_PHRASES
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, phrase)| *phrase)
        .unwrap_or("")
}

/// Writes a full HTTP/1.1 response: status line, headers, blank line, body.
pub fn send_response<S: Write>(
    stream: &mut S,
    status: u16,
    headers: &[(&str, &str)],
    body: &[u8],
) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

/// Convenience for the short plain-text error bodies the dispatcher sends
/// (400/405/409 etc. — spec 7: "no error text is returned in bodies beyond a
/// short reason").
pub fn send_text<S: Write>(stream: &mut S, status: u16, body: &str) -> std::io::Result<()> {
    let body = body.as_bytes();
    send_response(
        stream,
        status,
        &[
            ("Content-Type", "text/plain; charset=utf-8"),
            ("Content-Length", &body.len().to_string()),
        ],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_simple_get() {
        let raw = b"GET /ws?session=abc HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let req = read_http_request(&mut stream, 1024, 1024).unwrap().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path(), "/ws");
        assert_eq!(req.query(), Some("session=abc"));
        assert_eq!(req.header("upgrade"), Some("websocket"));
    }

    #[test]
    fn reads_bounded_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut stream = Cursor::new(raw.to_vec());
        let req = read_http_request(&mut stream, 1024, 1024).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn oversize_headers_return_none() {
        let raw = vec![b'a'; 100];
        let mut stream = Cursor::new(raw);
        let result = read_http_request(&mut stream, 10, 1024).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn oversize_body_returns_none() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 999999\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let result = read_http_request(&mut stream, 1024, 10).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn malformed_start_line_returns_none() {
        let raw = b"NOTVALID\r\n\r\n";
        let mut stream = Cursor::new(raw.to_vec());
        let result = read_http_request(&mut stream, 1024, 1024).unwrap();
        assert!(result.is_none());
    }
}
