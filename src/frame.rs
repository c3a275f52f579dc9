//! The tunnel framing protocol: one tag byte, an optional big-endian
//! length, and that many payload bytes.
//!
//! Mirrors the source's `enum tunnel_request` one-for-one. The high bit
//! (`0x40`) marks a "simple" frame, which never carries a length or
//! payload — the same macro-driven enum-with-metadata idiom this
//! codebase uses for `StatusCode` is overkill here since there's no
//! per-version text to generate, so this is a plain enum plus a few
//! `const fn` helpers instead.

use crate::error::{Result, TunnelError};

/// Bit set on every frame tag that carries no length/payload.
pub(crate) const SIMPLE_BIT: u8 = 0x40;

/// Largest payload length a single non-simple frame may declare.
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

/// Bytes of header overhead for a non-simple frame (tag + 2-byte length).
pub(crate) const FRAME_HEADER_LEN: usize = 3;

/// Bytes of overhead for a simple frame (tag only).
pub(crate) const SIMPLE_FRAME_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tag {
    Open = 0x01,
    Data = 0x02,
    Padding = 0x03,
    Error = 0x04,
    Pad1 = 0x45,
    Close = 0x46,
    Disconnect = 0x47,
}

impl Tag {
    #[inline]
    pub(crate) const fn value(self) -> u8 {
        self as u8
    }

    #[inline]
    pub(crate) const fn is_simple(self) -> bool {
        (self as u8) & SIMPLE_BIT != 0
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Tag::Open),
            0x02 => Ok(Tag::Data),
            0x03 => Ok(Tag::Padding),
            0x04 => Ok(Tag::Error),
            0x45 => Ok(Tag::Pad1),
            0x46 => Ok(Tag::Close),
            0x47 => Ok(Tag::Disconnect),
            other => Err(TunnelError::protocol(format!("unknown frame tag 0x{other:02x}"))),
        }
    }
}

/// A single decoded frame, borrowing its payload from the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    Open,
    Data(&'a [u8]),
    Padding(u16),
    Error(&'a [u8]),
    Pad1,
    Close,
    Disconnect,
}

impl<'a> Frame<'a> {
    pub(crate) fn tag(&self) -> Tag {
        match self {
            Frame::Open => Tag::Open,
            Frame::Data(_) => Tag::Data,
            Frame::Padding(_) => Tag::Padding,
            Frame::Error(_) => Tag::Error,
            Frame::Pad1 => Tag::Pad1,
            Frame::Close => Tag::Close,
            Frame::Disconnect => Tag::Disconnect,
        }
    }

    /// Total on-wire length of this frame (header + payload).
    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Frame::Pad1 | Frame::Close | Frame::Disconnect => SIMPLE_FRAME_LEN,
            Frame::Open => FRAME_HEADER_LEN + 1,
            Frame::Data(payload) | Frame::Error(payload) => FRAME_HEADER_LEN + payload.len(),
            Frame::Padding(len) => FRAME_HEADER_LEN + *len as usize,
        }
    }

    /// Serialize this frame into `out`, appending. `out` must have at
    /// least `encoded_len()` bytes of spare capacity for this to avoid
    /// reallocating mid-frame, but correctness doesn't depend on that.
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Pad1 => out.push(Tag::Pad1.value()),
            Frame::Close => out.push(Tag::Close.value()),
            Frame::Disconnect => out.push(Tag::Disconnect.value()),
            Frame::Open => {
                out.push(Tag::Open.value());
                out.extend_from_slice(&1u16.to_be_bytes());
                out.push(0);
            }
            Frame::Data(payload) => {
                out.push(Tag::Data.value());
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
            }
            Frame::Error(payload) => {
                out.push(Tag::Error.value());
                out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                out.extend_from_slice(payload);
            }
            Frame::Padding(len) => {
                out.push(Tag::Padding.value());
                out.extend_from_slice(&len.to_be_bytes());
                out.resize(out.len() + *len as usize, 0);
            }
        }
    }

    /// Decode one frame from the front of `buf`. Returns the frame and
    /// the number of bytes consumed. `Err(Again)` means `buf` doesn't yet
    /// hold a complete frame — the caller should read more and retry.
    pub(crate) fn decode(buf: &'a [u8]) -> Result<(Self, usize)> {
        let Some(&tag_byte) = buf.first() else {
            return Err(TunnelError::Again);
        };
        let tag = Tag::from_byte(tag_byte)?;
        if tag.is_simple() {
            let frame = match tag {
                Tag::Pad1 => Frame::Pad1,
                Tag::Close => Frame::Close,
                Tag::Disconnect => Frame::Disconnect,
                _ => unreachable!("simple bit set on a non-simple tag"),
            };
            return Ok((frame, SIMPLE_FRAME_LEN));
        }

        if buf.len() < FRAME_HEADER_LEN {
            return Err(TunnelError::Again);
        }
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        if buf.len() < FRAME_HEADER_LEN + len {
            return Err(TunnelError::Again);
        }
        let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
        let frame = match tag {
            Tag::Open => {
                if len != 1 {
                    return Err(TunnelError::protocol("OPEN frame must carry exactly one byte"));
                }
                Frame::Open
            }
            Tag::Data => Frame::Data(payload),
            Tag::Padding => {
                if len == 0 {
                    return Err(TunnelError::protocol("PADDING frame must carry at least one byte"));
                }
                Frame::Padding(len as u16)
            }
            Tag::Error => Frame::Error(payload),
            _ => unreachable!("non-simple tag already filtered"),
        };
        Ok((frame, FRAME_HEADER_LEN + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_frames_round_trip() {
        for frame in [Frame::Pad1, Frame::Close, Frame::Disconnect] {
            let mut buf = Vec::new();
            frame.encode_into(&mut buf);
            assert_eq!(buf.len(), 1);
            let (decoded, consumed) = Frame::decode(&buf).unwrap();
            assert_eq!(decoded, frame);
            assert_eq!(consumed, 1);
        }
    }

    #[test]
    fn open_frame_round_trips_with_its_dummy_byte() {
        let mut buf = Vec::new();
        Frame::Open.encode_into(&mut buf);
        assert_eq!(buf, vec![0x01, 0x00, 0x01, 0x00]);
        let (decoded, consumed) = Frame::decode(&buf).unwrap();
        assert_eq!(decoded, Frame::Open);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn data_frame_round_trips_for_boundary_payload_sizes() {
        for len in [0usize, 1, MAX_FRAME_PAYLOAD] {
            let payload = vec![0xABu8; len];
            let mut buf = Vec::new();
            Frame::Data(&payload).encode_into(&mut buf);
            assert_eq!(buf.len(), FRAME_HEADER_LEN + len);
            let (decoded, consumed) = Frame::decode(&buf).unwrap();
            assert_eq!(decoded, Frame::Data(&payload));
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn padding_frame_round_trips() {
        let mut buf = Vec::new();
        Frame::Padding(100).encode_into(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 100);
        let (decoded, _) = Frame::decode(&buf).unwrap();
        assert_eq!(decoded, Frame::Padding(100));
    }

    #[test]
    fn decode_reports_again_on_a_short_buffer() {
        let mut buf = Vec::new();
        Frame::Data(b"hello").encode_into(&mut buf);
        for cut in 0..buf.len() {
            assert!(matches!(Frame::decode(&buf[..cut]), Err(TunnelError::Again)));
        }
    }

    #[test]
    fn decode_rejects_an_unknown_tag() {
        assert!(Frame::decode(&[0x99]).is_err());
    }

    #[test]
    fn simple_bit_identifies_every_simple_tag() {
        assert!(Tag::Pad1.is_simple());
        assert!(Tag::Close.is_simple());
        assert!(Tag::Disconnect.is_simple());
        assert!(!Tag::Open.is_simple());
        assert!(!Tag::Data.is_simple());
        assert!(!Tag::Padding.is_simple());
        assert!(!Tag::Error.is_simple());
    }
}
