//! Minimal HTTP/1.1 request parsing and response framing

use std::io::{self, Write};

use blockweave_common::rest_response::{reason_phrase, RestResponse};

use crate::parsing::find_bytes;

/// A parsed request. The body is kept as raw bytes so binary uploads survive
/// intact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Parse a raw request. Returns `None` if there is no request line with
    /// both a method and a path.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (head, body) = match find_bytes(raw, b"\r\n\r\n", 0) {
            Some(pos) => (&raw[..pos], &raw[pos + 4..]),
            None => match find_bytes(raw, b"\n\n", 0) {
                Some(pos) => (&raw[..pos], &raw[pos + 2..]),
                None => (raw, &[][..]),
            },
        };

        let head = String::from_utf8_lossy(head);
        let mut lines = head.lines();

        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();

        let content_type = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default();

        Some(Self {
            method,
            path,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Write a complete `Connection: close` response.
pub fn write_response(out: &mut impl Write, response: &RestResponse) -> io::Result<()> {
    write!(
        out,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.code,
        reason_phrase(response.code),
        response.content_type,
        response.body.len()
    )?;
    out.write_all(response.body.as_bytes())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let request = HttpRequest::parse(b"GET /chain HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/chain");
        assert_eq!(request.content_type, "");
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_parse_body_and_content_type() {
        let raw = b"POST /transaction HTTP/1.1\r\ncontent-TYPE:  application/json \r\n\r\n{\"a\":1}";
        let request = HttpRequest::parse(raw).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.content_type, "application/json");
        assert_eq!(request.body, b"{\"a\":1}");
    }

    #[test]
    fn test_parse_bare_newlines() {
        let request = HttpRequest::parse(b"POST /files HTTP/1.1\nContent-Type: x\n\nbody").unwrap();
        assert_eq!(request.content_type, "x");
        assert_eq!(request.body, b"body");
    }

    #[test]
    fn test_body_is_binary_safe() {
        let mut raw = b"POST /files HTTP/1.1\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0, 159, 146, 150, 0xff, b'\r', b'\n']);
        let request = HttpRequest::parse(&raw).unwrap();
        assert_eq!(request.body, vec![0, 159, 146, 150, 0xff, b'\r', b'\n']);
    }

    #[test]
    fn test_parse_rejects_incomplete_request_line() {
        assert!(HttpRequest::parse(b"").is_none());
        assert!(HttpRequest::parse(b"GET\r\n\r\n").is_none());
    }

    #[test]
    fn test_write_response() {
        let mut out = Vec::new();
        write_response(&mut out, &RestResponse::with_text(404, "gone")).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\ngone"));
    }
}
