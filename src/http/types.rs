#![allow(rustdoc::bare_urls)]

//! Core HTTP wire types shared by request construction and response parsing.

use std::io;

use crate::error::TunnelError;

// TO LOWER CASE

#[rustfmt::skip]
const ASCII_TABLE: [u8; 256] = [
    //   x0    x1    x2    x3    x4    x5    x6    x7    x8    x9    xA    xB    xC    xD    xE    xF
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, // 0x
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, // 1x
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E, 0x2F, // 2x
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, // 3x
    0x40, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 4x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x5B, 0x5C, 0x5D, 0x5E, 0x5F, // 5x
    0x60, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 6x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x7B, 0x7C, 0x7D, 0x7E, 0x7F, // 7x
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x8D, 0x8E, 0x8F, // 8x
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0x9B, 0x9C, 0x9D, 0x9E, 0x9F, // 9x
    0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, // Ax
    0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, // Bx
    0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xCB, 0xCC, 0xCD, 0xCE, 0xCF, // Cx
    0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, // Dx
    0xE0, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xEB, 0xEC, 0xED, 0xEE, 0xEF, // Ex
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF, // Fx
];

#[inline(always)]
pub(crate) fn into_lower_case(src: &[u8], result: &mut [u8]) -> usize {
    let len = src.len().min(result.len());
    for i in 0..len {
        result[i] = ASCII_TABLE[src[i] as usize];
    }
    len
}

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods recognized on the wire.
///
/// Every one of these is legal on the tunnel's own request lines (the
/// engine only ever issues GET/POST/PUT itself, but a server accepting
/// connections from an arbitrary proxy must not choke on the rest).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
    Delete,
    Options,
    Trace,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), TunnelError> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 4)),
            [b'P', b'U', b'T', b' ', ..] => Ok((Method::Put, 4)),
            [b'P', b'O', b'S', b'T', b' ', ..] => Ok((Method::Post, 5)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 5)),
            [b'T', b'R', b'A', b'C', b'E', b' ', ..] => Ok((Method::Trace, 6)),
            [b'D', b'E', b'L', b'E', b'T', b'E', b' ', ..] => Ok((Method::Delete, 7)),
            [b'O', b'P', b'T', b'I', b'O', b'N', b'S', b' ', ..] => Ok((Method::Options, 8)),
            _ => Err(TunnelError::protocol("unrecognized request method")),
        }
    }

    #[inline(always)]
    pub(crate) const fn as_bytes(&self) -> &'static [u8] {
        match self {
            Method::Get => b"GET",
            Method::Put => b"PUT",
            Method::Post => b"POST",
            Method::Head => b"HEAD",
            Method::Delete => b"DELETE",
            Method::Options => b"OPTIONS",
            Method::Trace => b"TRACE",
        }
    }
}

// VERSION

/// HTTP protocol version. The tunnel never speaks HTTP/0.9; every request
/// and response line carries `HTTP/1.0` or `HTTP/1.1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<Self, TunnelError> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            _ => Err(TunnelError::ProtocolError(String::new())),
        }
    }

    #[inline(always)]
    pub(crate) const fn as_bytes(&self) -> &'static [u8] {
        match self {
            Version::Http10 => b"HTTP/1.0",
            Version::Http11 => b"HTTP/1.1",
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes the engine either emits or must classify.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            #[inline]
            pub(crate) const fn into_first_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// Classify a status code as the engine's narrow error taxonomy.
            /// `Ok(())` for any 2xx; 401/403 -> permission denied; 404 ->
            /// not found; every other 1xx/3xx/4xx/5xx (400, 411, 413, 505,
            /// and so on) is unexpected on this wire and surfaces as an I/O
            /// error rather than a protocol error, the same way a
            /// connection-level failure would.
            #[inline]
            pub(crate) fn classify(code: u16) -> Result<(), TunnelError> {
                match code {
                    200..=299 => Ok(()),
                    401 | 403 => Err(TunnelError::PermissionDenied),
                    404 => Err(TunnelError::NotFound),
                    100..=199 | 300..=399 | 400..=599 => Err(TunnelError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        format!("unexpected HTTP status {code}"),
                    ))),
                    other => Err(TunnelError::protocol(format!("unrecognized HTTP status {other}"))),
                }
            }
        }
    }
}

set_status_codes! {
    /// [[RFC9110, Section 15.3.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.1)]
    Ok = (200, "OK");
    /// [[RFC9110, Section 15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)]
    BadRequest = (400, "Bad Request");
    /// [[RFC9110, Section 15.5.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.2)]
    Unauthorized = (401, "Unauthorized");
    /// [[RFC9110, Section 15.5.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.4)]
    Forbidden = (403, "Forbidden");
    /// [[RFC9110, Section 15.5.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.5)]
    NotFound = (404, "Not Found");
    /// [[RFC9110, Section 15.5.12](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.12)]
    LengthRequired = (411, "Length Required");
    /// [[RFC9110, Section 15.5.14](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.14)]
    PayloadTooLarge = (413, "Payload Too Large");
    /// [[RFC9110, Section 15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)]
    InternalServerError = (500, "Internal Server Error");
    /// [[RFC9110, Section 15.6.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.4)]
    ServiceUnavailable = (503, "Service Unavailable");
    /// [[RFC9110, Section 15.6.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.6)]
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

// HEADER MAP

/// An ordered header list: no hash map, no recursion, duplicates and
/// insertion order preserved exactly as seen on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct HeaderMap {
    pub(crate) headers: Vec<Header>,
    pub(crate) content_length: Option<usize>,
}

impl HeaderMap {
    #[inline(always)]
    pub(crate) fn new(size_hint: usize) -> Self {
        Self {
            headers: Vec::with_capacity(size_hint),
            content_length: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.headers.clear();
        self.content_length = None;
    }

    #[inline(always)]
    pub(crate) fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }
}

// HEADER

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Header {
    pub(crate) name: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

impl Header {
    #[inline(always)]
    pub(crate) fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn method_from_bytes_recognizes_every_supported_verb() {
        let cases: &[(&[u8], Method, usize)] = &[
            (b"GET / HTTP/1.1\r\n", Method::Get, 4),
            (b"PUT / HTTP/1.1\r\n", Method::Put, 4),
            (b"POST / HTTP/1.1\r\n", Method::Post, 5),
            (b"HEAD / HTTP/1.1\r\n", Method::Head, 5),
            (b"TRACE / HTTP/1.1\r\n", Method::Trace, 6),
            (b"DELETE / HTTP/1.1\r\n", Method::Delete, 7),
            (b"OPTIONS / HTTP/1.1\r\n", Method::Options, 8),
        ];
        for (input, expected, len) in cases {
            let (method, consumed) = Method::from_bytes(input).unwrap();
            assert_eq!(method, *expected);
            assert_eq!(consumed, *len);
        }
    }

    #[test]
    fn method_from_bytes_rejects_unknown_verb() {
        assert!(Method::from_bytes(b"CONNECT / HTTP/1.1\r\n").is_err());
    }

    #[test]
    fn version_from_bytes_accepts_only_1_0_and_1_1() {
        assert_eq!(Version::from_bytes(b"HTTP/1.1").unwrap(), Version::Http11);
        assert_eq!(Version::from_bytes(b"HTTP/1.0").unwrap(), Version::Http10);
        assert!(Version::from_bytes(b"HTTP/0.9").is_err());
    }

    #[test]
    fn status_classify_matches_the_tunnel_error_taxonomy() {
        assert!(StatusCode::classify(200).is_ok());
        assert!(matches!(
            StatusCode::classify(401),
            Err(TunnelError::PermissionDenied)
        ));
        assert!(matches!(
            StatusCode::classify(403),
            Err(TunnelError::PermissionDenied)
        ));
        assert!(matches!(
            StatusCode::classify(404),
            Err(TunnelError::NotFound)
        ));
        assert!(matches!(StatusCode::classify(500), Err(TunnelError::Io(_))));
        assert!(matches!(StatusCode::classify(400), Err(TunnelError::Io(_))));
        assert!(matches!(StatusCode::classify(101), Err(TunnelError::Io(_))));
        assert!(matches!(StatusCode::classify(301), Err(TunnelError::Io(_))));
    }

    #[test]
    fn header_map_lookup_is_case_insensitive() {
        let mut map = HeaderMap::new(4);
        map.headers.push(Header::new(&b"Content-Length"[..], &b"10"[..]));
        assert_eq!(str(map.get(b"content-length")), Some("10"));
        assert_eq!(str(map.get(b"CONTENT-LENGTH")), Some("10"));
        assert_eq!(map.get(b"x-missing"), None);
    }
}
