//! Construction and parsing of the handful of HTTP messages the tunnel
//! ever sends or receives: a `GET`/`POST`/`PUT` request line plus a small
//! fixed header set, and a status line plus headers on the way back.
//!
//! Parsing fills a single reusable buffer with raw reads and slices it
//! with `memchr` rather than using a line-buffered reader — appropriate
//! here even though each connection only ever parses one head, since it
//! keeps the same "no hidden allocation per line" discipline as the
//! rest of this codebase.

use memchr::memchr;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::error::{Result, TunnelError};
use crate::http::types::{Header, HeaderMap, Method, StatusCode, Version};

/// Bound on the size of a request/status line plus headers. The tunnel's
/// own messages are a few hundred bytes; this just stops a hostile or
/// broken peer from growing the head buffer without limit.
const MAX_HEAD_SIZE: usize = 16 * 1024;

pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) headers: HeaderMap,
    /// Bytes read past the blank line terminating the head, i.e. the start
    /// of the body. A single `read` can land more than just the header.
    pub(crate) trailing: Vec<u8>,
}

pub(crate) struct ResponseHead {
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
    /// Bytes read past the blank line terminating the head; see `RequestHead::trailing`.
    pub(crate) trailing: Vec<u8>,
}

/// Read raw bytes off `stream` into `buf` until a blank line (`\r\n\r\n`)
/// appears, returning the slice up to (not including) the blank line and
/// any bytes read past it (the start of the body, if the caller read too
/// eagerly — callers here never do, since they `read` a small amount at
/// a time, but the split is still correct for a single read that
/// over-shoots).
async fn read_until_blank_line(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<usize> {
    let mut scan_from = 0;
    loop {
        if let Some(pos) = find_blank_line(&buf[scan_from..]) {
            return Ok(scan_from + pos);
        }
        scan_from = buf.len().saturating_sub(3);

        if buf.len() >= MAX_HEAD_SIZE {
            return Err(TunnelError::protocol("HTTP head exceeded size limit"));
        }
        let mut chunk = [0u8; 512];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(TunnelError::Io)?;
        if n == 0 {
            return Err(TunnelError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    while let Some(rel) = memchr(b'\n', &buf[start..]) {
        let pos = start + rel;
        if pos >= 1 && buf[pos - 1] == b'\r' {
            if pos + 2 <= buf.len() && buf[pos + 1] == b'\r' && buf[pos + 2] == b'\n' {
                return Some(pos - 1);
            }
        }
        start = pos + 1;
    }
    None
}

fn split_lines(head: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start <= head.len() {
        match memchr(b'\n', &head[start..]) {
            Some(rel) => {
                let end = start + rel;
                let line = if end > start && head[end - 1] == b'\r' {
                    &head[start..end - 1]
                } else {
                    &head[start..end]
                };
                lines.push(line);
                start = end + 1;
            }
            None => {
                if start < head.len() {
                    lines.push(&head[start..]);
                }
                break;
            }
        }
    }
    lines
}

fn parse_headers(lines: &[&[u8]]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new(lines.len());
    for line in lines {
        let colon = memchr(b':', line)
            .ok_or_else(|| TunnelError::protocol("malformed header line"))?;
        let name = &line[..colon];
        let mut value = &line[colon + 1..];
        while value.first() == Some(&b' ') {
            value = &value[1..];
        }
        if name.eq_ignore_ascii_case(b"content-length") {
            let n: usize = std::str::from_utf8(value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| TunnelError::protocol("malformed Content-Length"))?;
            headers.content_length = Some(n);
        }
        headers.headers.push(Header::new(name, value));
    }
    Ok(headers)
}

/// Parse an incoming request line (`METHOD target HTTP/x.y`) plus headers,
/// used by the server side of `accept`.
pub(crate) async fn read_request_head(stream: &mut TcpStream) -> Result<RequestHead> {
    let mut buf = Vec::with_capacity(512);
    let head_end = read_until_blank_line(stream, &mut buf).await?;
    let head = &buf[..head_end];

    let mut lines = split_lines(head);
    if lines.is_empty() {
        return Err(TunnelError::protocol("empty request"));
    }
    let request_line = lines.remove(0);

    let (method, method_len) = Method::from_bytes(request_line)?;
    let rest = &request_line[method_len..];
    let version_start = rest
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or_else(|| TunnelError::protocol("malformed request line"))?;
    let target = &rest[..version_start];
    let version_bytes = &rest[version_start + 1..];
    Version::from_bytes(version_bytes)?;

    let target = std::str::from_utf8(target)
        .map_err(|_| TunnelError::protocol("request target is not valid UTF-8"))?
        .to_owned();

    let headers = parse_headers(&lines)?;
    let trailing = buf[head_end..].to_vec();
    let trailing = strip_blank_line(trailing);
    Ok(RequestHead {
        method,
        target,
        headers,
        trailing,
    })
}

/// `buf[head_end..]` still starts with the blank line itself (`\r\n\r\n` or
/// `\n\n`); drop it so `trailing` holds only genuine body bytes.
fn strip_blank_line(mut buf: Vec<u8>) -> Vec<u8> {
    if buf.starts_with(b"\r\n\r\n") {
        buf.drain(0..4);
    } else if buf.starts_with(b"\n\n") {
        buf.drain(0..2);
    }
    buf
}

/// Parse a `HTTP/x.y <code> <reason>` status line plus headers, used by
/// the client side of `connect` to validate the server's `200 OK`.
pub(crate) async fn read_response_head(stream: &mut TcpStream) -> Result<ResponseHead> {
    let mut buf = Vec::with_capacity(512);
    let head_end = read_until_blank_line(stream, &mut buf).await?;
    let head = &buf[..head_end];

    let mut lines = split_lines(head);
    if lines.is_empty() {
        return Err(TunnelError::protocol("empty response"));
    }
    let status_line = lines.remove(0);

    let mut parts = status_line.splitn(3, |&b| b == b' ');
    let version_bytes = parts.next().unwrap_or(b"");
    Version::from_bytes(version_bytes)?;
    let code_bytes = parts
        .next()
        .ok_or_else(|| TunnelError::protocol("malformed status line"))?;
    let status: u16 = std::str::from_utf8(code_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TunnelError::protocol("malformed status code"))?;

    let headers = parse_headers(&lines)?;
    let trailing = strip_blank_line(buf[head_end..].to_vec());
    Ok(ResponseHead {
        status,
        headers,
        trailing,
    })
}

/// Cache-busting request target: `/index.html?crap=<unix_time>`, or the
/// absolute form when a proxy is in play.
pub(crate) fn build_target(host: &str, port: u16, unix_time: u64, via_proxy: bool) -> String {
    if via_proxy {
        format!("http://{host}:{port}/index.html?crap={unix_time}")
    } else {
        format!("/index.html?crap={unix_time}")
    }
}

/// Parameters for an outbound client request (`POST` to the destination
/// for the upload half, `GET` for the download half).
pub(crate) struct OutboundRequest<'a> {
    pub(crate) method: Method,
    pub(crate) target: &'a str,
    pub(crate) host: &'a str,
    pub(crate) port: u16,
    pub(crate) content_length: Option<usize>,
    pub(crate) proxy_authorization: Option<&'a str>,
    pub(crate) user_agent: Option<&'a str>,
}

/// Serialize a client request line plus the fixed header set the engine
/// controls (`Host`, `Content-Length`, `Connection: close`, and the two
/// optional proxy headers).
pub(crate) fn build_outbound_request(req: &OutboundRequest<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(req.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    out.extend_from_slice(format!("Host: {}:{}\r\n", req.host, req.port).as_bytes());
    if let Some(len) = req.content_length {
        out.extend_from_slice(format!("Content-Length: {len}\r\n").as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n");
    if let Some(auth) = req.proxy_authorization {
        out.extend_from_slice(format!("Proxy-Authorization: {auth}\r\n").as_bytes());
    }
    if let Some(agent) = req.user_agent {
        out.extend_from_slice(format!("User-Agent: {agent}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// The server's canned `200 OK` answer to the `GET` half of a pair, per
/// §4.2: a fixed no-cache header set and a `Content-Length` equal to the
/// negotiated window.
pub(crate) fn build_ok_response(content_length: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(192);
    out.extend_from_slice(StatusCode::Ok.into_first_line(Version::Http11));
    out.extend_from_slice(format!("Content-Length: {content_length}\r\n").as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(b"Pragma: no-cache\r\n");
    out.extend_from_slice(b"Cache-Control: no-cache, no-store, must-revalidate\r\n");
    out.extend_from_slice(b"Expires: 0\r\n");
    out.extend_from_slice(b"Content-Type: text/html\r\n");
    out.extend_from_slice(b"\r\n");
    out
}
