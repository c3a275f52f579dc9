//! Byte I/O and socket-option utilities.
//!
//! The source toggled a raw fd between blocking and nonblocking mode
//! around each `read_exact`/`write_all`. Tokio's async `TcpStream` makes
//! that toggling unnecessary; these free functions keep the same names
//! and the same "drive one read/write to completion" contract so the
//! engine above reads the same regardless.

use std::io;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, TunnelError};

/// Read exactly `n` bytes, or fewer on clean EOF. Returns the number of
/// bytes actually read; `0` means the peer closed before sending anything.
pub(crate) async fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match stream.read(&mut buf[read..]).await {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TunnelError::Io(e)),
        }
    }
    Ok(read)
}

/// Write the whole buffer, retrying on transient errors. A broken pipe
/// (the peer closed the connection) surfaces as an ordinary `io::Error`;
/// the caller decides whether to reconnect.
pub(crate) async fn write_all(stream: &mut TcpStream, buf: &[u8]) -> Result<()> {
    match stream.write_all(buf).await {
        Ok(()) => Ok(()),
        Err(e) => Err(TunnelError::Io(e)),
    }
}

/// Apply the outbound-socket tuning the source applies in
/// `tunnel_out_setsockopts`: small send low-water mark, a short linger on
/// close, Nagle disabled (or, failing that, an unbuffered send side), and
/// TCP keepalive. Every setting is best-effort; failures are logged and
/// ignored, never propagated.
pub(crate) fn tune_outbound_socket(stream: &TcpStream) {
    set_sndlowat(stream);
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_linger(Some(Duration::from_secs(20))) {
        tracing::debug!(error = %e, "SO_LINGER failed on outbound socket");
    }
    if sock.set_tcp_nodelay(true).is_err() {
        if let Err(e) = sock.set_send_buffer_size(0) {
            tracing::debug!(error = %e, "TCP_NODELAY and SO_SNDBUF=0 both failed on outbound socket");
        }
    }
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "SO_KEEPALIVE failed on outbound socket");
    }
}

/// Set a send low-water mark of 1 so writes flush promptly instead of
/// waiting for a full buffer. `socket2` has no portable `SO_SNDLOWAT`
/// setter, same situation as `SO_RCVLOWAT` below, so this goes through
/// `libc` directly.
#[cfg(unix)]
fn set_sndlowat(stream: &TcpStream) {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let lowat: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDLOWAT,
            &lowat as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        tracing::debug!(error = %io::Error::last_os_error(), "SO_SNDLOWAT failed on outbound socket");
    }
}

#[cfg(not(unix))]
fn set_sndlowat(_stream: &TcpStream) {}

/// Apply the inbound-socket tuning from `tunnel_in_setsockopts`: a small
/// receive low-water mark so reads deliver promptly instead of waiting
/// for a full buffer. `socket2` doesn't expose `SO_RCVLOWAT` as a portable
/// method, so this goes through `libc` directly, same as the option the
/// source sets with a raw `setsockopt(2)` call.
#[cfg(unix)]
pub(crate) fn tune_inbound_socket(stream: &TcpStream) {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let lowat: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVLOWAT,
            &lowat as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        tracing::debug!(error = %io::Error::last_os_error(), "SO_RCVLOWAT failed on inbound socket");
    }
}

#[cfg(not(unix))]
pub(crate) fn tune_inbound_socket(_stream: &TcpStream) {}
