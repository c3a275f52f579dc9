//! Accumulates raw bytes off the inbound body and hands back owned,
//! fully-decoded frames. Kept separate from [`super::Frame`] because a
//! decoded `Frame<'a>` borrows the very buffer this module has to keep
//! mutating as more bytes arrive.

use tokio::io::AsyncReadExt;

use crate::error::{Result, TunnelError};
use crate::frame::Frame;

use super::Tunnel;

pub(super) enum OwnedFrame {
    Open,
    Data(Vec<u8>),
    Padding(u16),
    Error(Vec<u8>),
    Pad1,
    Close,
    Disconnect,
}

impl From<Frame<'_>> for OwnedFrame {
    fn from(frame: Frame<'_>) -> Self {
        match frame {
            Frame::Open => OwnedFrame::Open,
            Frame::Data(payload) => OwnedFrame::Data(payload.to_vec()),
            Frame::Padding(len) => OwnedFrame::Padding(len),
            Frame::Error(payload) => OwnedFrame::Error(payload.to_vec()),
            Frame::Pad1 => OwnedFrame::Pad1,
            Frame::Close => OwnedFrame::Close,
            Frame::Disconnect => OwnedFrame::Disconnect,
        }
    }
}

/// Read off `tunnel.inbound` until one full frame is available, consume
/// its bytes from `tunnel.in_buf`, and return it. Never called with
/// `tunnel.inbound` empty.
pub(super) async fn read_one_frame(tunnel: &mut Tunnel) -> Result<OwnedFrame> {
    loop {
        match Frame::decode(&tunnel.in_buf) {
            Ok((frame, consumed)) => {
                let owned = OwnedFrame::from(frame);
                tunnel.in_buf.drain(0..consumed);
                return Ok(owned);
            }
            Err(TunnelError::Again) => {
                let mut chunk = [0u8; 4096];
                let stream = tunnel
                    .inbound
                    .as_mut()
                    .ok_or_else(|| TunnelError::protocol("inbound body closed mid-frame"))?;
                let n = stream.read(&mut chunk).await.map_err(TunnelError::Io)?;
                if n == 0 {
                    return Err(TunnelError::Io(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )));
                }
                tunnel.in_buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(e),
        }
    }
}
