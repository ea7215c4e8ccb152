//! Static file responder (C3)
//!
//! Serves files from a fixed root directory with path-traversal protection
//! and a fixed MIME table. Ported from
//! `original_source/src/zerotermd/http_utils.py` (`_resolve_path`,
//! `_is_within`, `serve_static`, `CONTENT_TYPES`).

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::http;

const CONTENT_TYPES: &[(&str, &str)] = &[
    (".html", "text/html; charset=utf-8"),
    (".css", "text/css; charset=utf-8"),
    (".js", "application/javascript; charset=utf-8"),
    (".svg", "image/svg+xml"),
    (".ico", "image/x-icon"),
    (".png", "image/png"),
    (".woff2", "font/woff2"),
];

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn content_type_for(path: &Path) -> &'static str {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return DEFAULT_CONTENT_TYPE,
    };
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| name.to_lowercase().ends_with(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Resolves a request path against `root`, rejecting any result that
/// escapes it. `/` maps to `index.html`. Returns `None` for both "does not
/// resolve" and "resolves outside root" — callers don't get to distinguish
/// traversal attempts from ordinary 404s, which is the point.
pub fn resolve_path(target: &str, root: &Path) -> Option<PathBuf> {
    let path = target.split('?').next().unwrap_or(target);
    let path = if path == "/" { "/index.html" } else { path };
    let relative = path.trim_start_matches('/');

    let candidate = root.join(relative);
    let resolved = candidate.canonicalize().ok()?;
    let root = root.canonicalize().ok()?;

    if resolved.starts_with(&root) {
        Some(resolved)
    } else {
        None
    }
}

/// Serves `target` from `root` onto `stream`: 200 with the file bytes, 404
/// if missing (including any traversal attempt), 500 on read failure.
pub fn serve_static<S: Write>(stream: &mut S, target: &str, root: &Path) -> std::io::Result<()> {
    let resolved = resolve_path(target, root).filter(|p| p.is_file());
    let resolved = match resolved {
        Some(p) => p,
        None => return http::send_text(stream, 404, "Not Found"),
    };

    let body = match std::fs::read(&resolved) {
        Ok(body) => body,
        Err(_) => return http::send_text(stream, 500, "Internal Server Error"),
    };

    http::send_response(
        stream,
        200,
        &[
            ("Content-Type", content_type_for(&resolved)),
            ("Content-Length", &body.len().to_string()),
            ("Cache-Control", "no-store"),
        ],
        &body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn resolves_index_at_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "ok").unwrap();
        let resolved = resolve_path("/", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("index.html").canonicalize().unwrap());
    }

    #[test]
    fn blocks_traversal_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_path("/../../etc/passwd", dir.path()).is_none());
    }

    #[test]
    fn serves_existing_file_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();
        let mut out = Cursor::new(Vec::new());
        serve_static(&mut out, "/app.css", dir.path()).unwrap();
        let response = String::from_utf8(out.into_inner()).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: text/css; charset=utf-8"));
        assert!(response.contains("Cache-Control: no-store"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Cursor::new(Vec::new());
        serve_static(&mut out, "/nope.html", dir.path()).unwrap();
        let response = String::from_utf8(out.into_inner()).unwrap();
        assert!(response.starts_with("HTTP/1.1 404"));
    }
}
