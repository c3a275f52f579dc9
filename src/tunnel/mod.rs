//! The tunnel engine: the state machine that drives a pair of HTTP bodies
//! as a single framed byte stream.
//!
//! Grounded in the source's `tunnel.c`, but expressed as an async state
//! machine instead of a blocking-mode-toggling `poll(2)` loop (see the
//! crate-level docs for why that's a faithful translation, not a
//! behavior change). `read`/`write`/`padding`/`maybe_pad`/`close` below
//! are 1:1 with the source's functions of the same name; `connect` and
//! `accept` are the client and server halves of establishing a tunnel.

use std::collections::VecDeque;
use std::io;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::error::{Result, TunnelError};
use crate::frame::{Frame, FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use crate::http::message::{
    build_ok_response, build_outbound_request, build_target, read_request_head,
    read_response_head, OutboundRequest,
};
use crate::http::types::{Method, StatusCode};
use crate::io_util::{read_exact, tune_inbound_socket, tune_outbound_socket, write_all};
use crate::options::{TunnelOptions, ACCEPT_TIMEOUT, CLOSE_DRAIN_TIMEOUT, STAGING_BUFFER_SIZE};

mod frame_io;
use frame_io::OwnedFrame;

/// A destination the client dials directly, or through a proxy.
#[derive(Debug, Clone)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub proxy: Option<(String, u16)>,
}

enum Role {
    Client(Destination),
    Server { listener: TcpListener },
}

/// A bidirectional byte-stream tunnel. Exactly one of client or server
/// for its lifetime; see [`Tunnel::new_client`] / [`Tunnel::new_server`].
pub struct Tunnel {
    options: TunnelOptions,
    role: Role,
    /// The HTTP body this side is currently writing application bytes into.
    out: Option<TcpStream>,
    /// The HTTP body this side is currently reading application bytes from.
    inbound: Option<TcpStream>,
    /// Undigested bytes read off `inbound`, awaiting a full frame.
    in_buf: Vec<u8>,
    /// Decoded DATA payload awaiting delivery to the caller of `read`.
    staging: VecDeque<u8>,
    /// Bytes written into the current outbound window so far.
    bytes: usize,
    /// True once `read` has observed a clean CLOSE; never reconnects after.
    peer_closed: bool,
    /// True if nothing but padding has been written in the current window.
    padding_only: bool,
    /// When the current outbound window was opened.
    out_connect_time: Option<Instant>,
}

impl Tunnel {
    /// Resolve a destination (through `proxy` if given) and prepare a
    /// client tunnel. Nothing is dialed until [`Tunnel::connect`].
    pub fn new_client(destination: Destination, options: TunnelOptions) -> Self {
        Tunnel {
            options,
            role: Role::Client(destination),
            out: None,
            inbound: None,
            in_buf: Vec::with_capacity(4096),
            staging: VecDeque::with_capacity(STAGING_BUFFER_SIZE),
            bytes: 0,
            peer_closed: false,
            padding_only: true,
            out_connect_time: None,
        }
    }

    /// Bind a listening socket on `(bind_host or wildcard, port)`. Nothing
    /// is accepted until [`Tunnel::accept`].
    pub async fn new_server(bind_host: Option<&str>, port: u16, options: TunnelOptions) -> Result<Self> {
        let host = bind_host.unwrap_or("0.0.0.0");
        let listener = TcpListener::bind((host, port)).await.map_err(TunnelError::Io)?;
        Ok(Tunnel {
            options,
            role: Role::Server { listener },
            out: None,
            inbound: None,
            in_buf: Vec::with_capacity(4096),
            staging: VecDeque::with_capacity(STAGING_BUFFER_SIZE),
            bytes: 0,
            peer_closed: false,
            padding_only: true,
            out_connect_time: None,
        })
    }

    #[inline]
    fn is_client(&self) -> bool {
        matches!(self.role, Role::Client(_))
    }

    /// The address a server tunnel's listening socket is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        match &self.role {
            Role::Server { listener } => listener.local_addr().map_err(TunnelError::Io),
            Role::Client(_) => Err(TunnelError::invalid_argument("local_addr is server-only")),
        }
    }

    /// Set a named option. See [`TunnelOptions`] for the recognized names.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.options.set_named(name, value)
    }

    /// Read a named option back. See [`TunnelOptions`] for the recognized names.
    pub fn get_option(&self, name: &str) -> Result<Option<String>> {
        self.options.get_named(name)
    }

    #[inline]
    fn window(&self) -> usize {
        self.options.client_window()
    }

    fn unix_time() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    // ---- establishing the tunnel ----------------------------------------

    /// Client: open the outbound body (writing OPEN as its first frame),
    /// then open the inbound body and validate the server's `200 OK`.
    pub async fn connect(&mut self) -> Result<()> {
        if !self.is_client() {
            return Err(TunnelError::invalid_argument("connect is client-only"));
        }
        if self.out.is_some() || self.inbound.is_some() {
            return Err(TunnelError::invalid_argument("tunnel is already connected"));
        }
        self.write_one_frame(Frame::Open).await?;
        self.reopen_in().await?;
        Ok(())
    }

    /// Server: accept TCP connections until both an upload (`POST`/`PUT`)
    /// and a download (`GET`) half have been paired, with a 10s timeout
    /// for the second half once the first has arrived.
    pub async fn accept(&mut self) -> Result<()> {
        let Role::Server { listener } = &self.role else {
            return Err(TunnelError::invalid_argument("accept is server-only"));
        };

        while self.inbound.is_none() || self.out.is_none() {
            let have_one_half = self.inbound.is_some() || self.out.is_some();
            let accepted = if have_one_half {
                match timeout(ACCEPT_TIMEOUT, listener.accept()).await {
                    Ok(Ok((stream, _))) => stream,
                    Ok(Err(e)) => return Err(TunnelError::Io(e)),
                    Err(_) => {
                        self.inbound = None;
                        self.out = None;
                        return Err(TunnelError::protocol(
                            "timed out waiting for the second half of the pair",
                        ));
                    }
                }
            } else {
                listener.accept().await.map_err(TunnelError::Io)?.0
            };

            let mut stream = accepted;
            let head = match read_request_head(&mut stream).await {
                Ok(head) => head,
                Err(_) => continue,
            };

            match head.method {
                Method::Post | Method::Put if self.inbound.is_none() => {
                    tune_inbound_socket(&stream);
                    self.inbound = Some(stream);
                    self.in_buf = head.trailing;
                }
                Method::Get if self.out.is_none() => {
                    let response = build_ok_response(self.options.content_length);
                    if write_all(&mut stream, &response).await.is_err() {
                        continue;
                    }
                    tune_outbound_socket(&stream);
                    self.out = Some(stream);
                    self.bytes = 0;
                    self.padding_only = true;
                    self.out_connect_time = Some(Instant::now());
                }
                _ => continue,
            }
        }
        Ok(())
    }

    async fn reopen_out(&mut self) -> Result<()> {
        match &self.role {
            Role::Client(dest) => {
                let dest = dest.clone();
                let (connect_host, connect_port) = dest
                    .proxy
                    .clone()
                    .unwrap_or((dest.host.clone(), dest.port));
                let mut stream = TcpStream::connect((connect_host.as_str(), connect_port))
                    .await
                    .map_err(TunnelError::Io)?;
                let target = build_target(&dest.host, dest.port, Self::unix_time(), dest.proxy.is_some());
                let request = build_outbound_request(&OutboundRequest {
                    method: Method::Post,
                    target: &target,
                    host: &dest.host,
                    port: dest.port,
                    content_length: Some(self.options.content_length),
                    proxy_authorization: self.options.proxy_authorization.as_deref(),
                    user_agent: self.options.user_agent.as_deref(),
                });
                write_all(&mut stream, &request).await?;
                tune_outbound_socket(&stream);
                self.out = Some(stream);
                self.bytes = 0;
                self.padding_only = true;
                self.out_connect_time = Some(Instant::now());
                Ok(())
            }
            Role::Server { .. } => {
                self.out = None;
                self.accept().await
            }
        }
    }

    async fn reopen_in(&mut self) -> Result<()> {
        match &self.role {
            Role::Client(dest) => {
                let dest = dest.clone();
                let (connect_host, connect_port) = dest
                    .proxy
                    .clone()
                    .unwrap_or((dest.host.clone(), dest.port));
                let mut stream = TcpStream::connect((connect_host.as_str(), connect_port))
                    .await
                    .map_err(TunnelError::Io)?;
                let target = build_target(&dest.host, dest.port, Self::unix_time(), dest.proxy.is_some());
                let request = build_outbound_request(&OutboundRequest {
                    method: Method::Get,
                    target: &target,
                    host: &dest.host,
                    port: dest.port,
                    content_length: None,
                    proxy_authorization: self.options.proxy_authorization.as_deref(),
                    user_agent: self.options.user_agent.as_deref(),
                });
                write_all(&mut stream, &request).await?;
                let head = read_response_head(&mut stream).await?;
                StatusCode::classify(head.status)?;
                tune_inbound_socket(&stream);
                self.inbound = Some(stream);
                self.in_buf = head.trailing;
                Ok(())
            }
            Role::Server { .. } => {
                self.inbound = None;
                self.accept().await
            }
        }
    }

    // ---- writing ----------------------------------------------------------

    /// Segment `buf` into DATA frames respecting the current window,
    /// rolling over to a fresh outbound body whenever one fills.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let max_per_frame = self.max_payload_per_frame()?;
        let mut written = 0;
        while written < buf.len() {
            let chunk = (buf.len() - written).min(max_per_frame);
            self.write_one_frame(Frame::Data(&buf[written..written + chunk]))
                .await?;
            written += chunk;
        }
        Ok(written)
    }

    fn max_payload_per_frame(&self) -> Result<usize> {
        let max = self.window().saturating_sub(FRAME_HEADER_LEN).min(MAX_FRAME_PAYLOAD);
        if max == 0 {
            return Err(TunnelError::invalid_argument("content window too small for a DATA frame"));
        }
        Ok(max)
    }

    /// Emit `n` wire bytes of filler (header included for PADDING frames):
    /// fewer than 4 become PAD1 frames one at a time; 4 or more become
    /// PADDING frames, chunked to respect the window.
    pub async fn padding(&mut self, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        if n < 4 {
            for _ in 0..n {
                self.write_one_frame(Frame::Pad1).await?;
            }
            return Ok(n);
        }
        let max_total_per_frame = self.max_payload_per_frame()? + FRAME_HEADER_LEN;
        let mut remaining = n;
        while remaining > 0 {
            let total = remaining.min(max_total_per_frame);
            let payload = total - FRAME_HEADER_LEN;
            self.write_one_frame(Frame::Padding(payload as u16)).await?;
            remaining -= total;
        }
        Ok(n)
    }

    /// Pad up to the next multiple of `block`, unless the tunnel is
    /// disconnected, already on a multiple, or the window has seen only
    /// padding so far.
    pub async fn maybe_pad(&mut self, block: usize) -> Result<usize> {
        if block == 0 || self.out.is_none() || self.padding_only || self.bytes % block == 0 {
            return Ok(0);
        }
        let to_next_multiple = block - (self.bytes % block);
        let room = self.window().saturating_sub(self.bytes);
        let amount = to_next_multiple.min(room);
        if amount == 0 {
            return Ok(0);
        }
        self.padding(amount).await
    }

    /// Write one raw frame, applying the engine's reconnection policy:
    /// ensure the outbound body is open, force age-based rollover first
    /// (client only), pad-and-roll if this frame doesn't fit the current
    /// window, then write it and roll over again if that filled it.
    async fn write_one_frame(&mut self, frame: Frame<'_>) -> Result<()> {
        self.ensure_out_open().await?;
        self.maybe_age_rollover().await?;
        self.ensure_out_open().await?;

        let needed = frame.encoded_len();
        let room = self.window().saturating_sub(self.bytes);
        if needed > room {
            if room > 0 {
                self.pad_raw(room).await?;
            }
            if self.bytes >= self.window() {
                self.emit(Frame::Disconnect).await?;
                self.out = None;
            }
            self.ensure_out_open().await?;
            return Box::pin(self.write_one_frame(frame)).await;
        }

        self.emit(frame).await?;
        if self.bytes >= self.window() {
            self.emit(Frame::Disconnect).await?;
            self.out = None;
        }
        Ok(())
    }

    async fn ensure_out_open(&mut self) -> Result<()> {
        if self.out.is_none() {
            self.reopen_out().await?;
        }
        Ok(())
    }

    async fn maybe_age_rollover(&mut self) -> Result<()> {
        if !self.is_client() || self.out.is_none() || self.padding_only {
            return Ok(());
        }
        let Some(opened) = self.out_connect_time else {
            return Ok(());
        };
        if opened.elapsed() < self.options.max_connection_age {
            return Ok(());
        }
        if self.options.strict_content_length {
            let remainder = self.window().saturating_sub(self.bytes);
            if remainder > 0 {
                self.pad_raw(remainder).await?;
            }
        }
        self.emit(Frame::Disconnect).await?;
        self.out = None;
        Ok(())
    }

    /// Fill exactly `n` wire bytes of the current window with PADDING/PAD1
    /// frames (header included), assuming `n` already fits in the
    /// remaining window.
    async fn pad_raw(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if n < 4 {
                self.emit(Frame::Pad1).await?;
                n -= 1;
            } else {
                let total = n.min(MAX_FRAME_PAYLOAD + FRAME_HEADER_LEN);
                let payload = total - FRAME_HEADER_LEN;
                self.emit(Frame::Padding(payload as u16)).await?;
                n -= total;
            }
        }
        Ok(())
    }

    /// Write one frame's bytes to the wire and update window accounting.
    /// Retries once on a broken pipe by reopening the outbound body.
    async fn emit(&mut self, frame: Frame<'_>) -> Result<()> {
        let mut encoded = Vec::with_capacity(frame.encoded_len());
        frame.encode_into(&mut encoded);

        let first_attempt = {
            let stream = self.out.as_mut().expect("emit called with no outbound body open");
            write_all(stream, &encoded).await
        };
        match first_attempt {
            Ok(()) => {}
            Err(TunnelError::Io(e)) if is_broken_pipe(&e) => {
                self.out = None;
                self.reopen_out().await?;
                let stream = self.out.as_mut().expect("reopen_out must set out");
                write_all(stream, &encoded).await?;
            }
            Err(e) => return Err(e),
        }

        self.bytes += encoded.len();
        if !matches!(frame, Frame::Padding(_) | Frame::Pad1) {
            self.padding_only = false;
        }
        Ok(())
    }

    // ---- reading ------------------------------------------------------------

    /// Drain the staging buffer first; otherwise parse and act on the
    /// next frame from the inbound body.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.peer_closed {
            return Ok(0);
        }
        if !self.staging.is_empty() {
            let n = self.staging.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.staging.pop_front().expect("checked non-empty above");
            }
            return Ok(n);
        }

        if self.inbound.is_none() {
            self.reopen_in().await?;
            return Err(TunnelError::Again);
        }

        let frame = frame_io::read_one_frame(self).await?;
        match frame {
            OwnedFrame::Open => Err(TunnelError::Again),
            OwnedFrame::Data(payload) => {
                self.staging.extend(payload);
                Box::pin(self.read(buf)).await
            }
            OwnedFrame::Padding(_) | OwnedFrame::Pad1 => Err(TunnelError::Again),
            OwnedFrame::Error(text) => {
                let text = String::from_utf8_lossy(&text).into_owned();
                tracing::warn!(%text, "peer sent an ERROR frame");
                Err(TunnelError::Io(io::Error::new(io::ErrorKind::Other, text)))
            }
            OwnedFrame::Close => {
                self.peer_closed = true;
                self.inbound = None;
                Ok(0)
            }
            OwnedFrame::Disconnect => {
                self.inbound = None;
                if self.is_client() {
                    let _ = self.reopen_in().await;
                }
                Err(TunnelError::Again)
            }
        }
    }

    // ---- teardown -----------------------------------------------------------

    /// If strict, pad the current window to `W-1`, write CLOSE, close the
    /// outbound body, drain the inbound body for up to 1s, then close it
    /// too. Resets window accounting.
    pub async fn close(&mut self) -> Result<()> {
        if self.out.is_some() {
            if self.options.strict_content_length {
                let remainder = self.window().saturating_sub(self.bytes);
                if remainder > 0 {
                    let _ = self.pad_raw(remainder).await;
                }
            }
            let _ = self.emit(Frame::Close).await;
            self.out = None;
        }
        if let Some(mut inbound) = self.inbound.take() {
            let _ = timeout(CLOSE_DRAIN_TIMEOUT, drain_trailing(&mut inbound)).await;
        }
        self.bytes = 0;
        self.padding_only = true;
        self.out_connect_time = None;
        self.in_buf.clear();
        Ok(())
    }

    /// Graceful, awaitable teardown: close if still connected, then drop
    /// the listening socket. `Drop` alone (which cannot `.await`) is a
    /// best-effort fd-closing backstop behind this.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.out.is_some() || self.inbound.is_some() {
            self.close().await?;
        }
        Ok(())
    }

    /// Await readiness the way a caller driving its own reactor loop
    /// would select on: the listening socket while either half of a
    /// server pair is missing, otherwise the inbound body.
    pub(crate) async fn readable(&self) -> Result<()> {
        match &self.role {
            Role::Server { listener } if self.inbound.is_none() || self.out.is_none() => {
                listener.readable().await.map_err(TunnelError::Io)
            }
            _ => match &self.inbound {
                Some(stream) => stream.readable().await.map_err(TunnelError::Io),
                None => Err(TunnelError::Again),
            },
        }
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

async fn drain_trailing(stream: &mut TcpStream) -> Result<()> {
    let mut scratch = [0u8; 4096];
    loop {
        match read_exact(stream, &mut scratch[..1]).await {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(_) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TunnelOptions;

    async fn paired_tunnels(window: usize, strict: bool) -> (Tunnel, Tunnel) {
        let mut server_opts = TunnelOptions::default();
        server_opts.content_length = window;
        server_opts.strict_content_length = strict;
        let mut server = Tunnel::new_server(Some("127.0.0.1"), 0, server_opts).await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut client_opts = TunnelOptions::default();
        client_opts.content_length = window;
        client_opts.strict_content_length = strict;
        let destination = Destination {
            host: addr.ip().to_string(),
            port: addr.port(),
            proxy: None,
        };
        let mut client = Tunnel::new_client(destination, client_opts);

        let server_accept = tokio::spawn(async move {
            server.accept().await.unwrap();
            server
        });
        client.connect().await.unwrap();
        let server = server_accept.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn s1_small_write_round_trips_exactly() {
        let (mut client, mut server) = paired_tunnels(4096, false).await;
        let written = client.write(b"hello").await.unwrap();
        assert_eq!(written, 5);

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 5 {
            match server.read(&mut buf).await {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(TunnelError::Again) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn s6_close_yields_repeated_zero_reads_without_reconnecting() {
        let (mut client, mut server) = paired_tunnels(4096, false).await;
        client.close().await.unwrap();

        let mut buf = [0u8; 16];
        loop {
            match server.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => panic!("expected a clean EOF, not data"),
                Err(TunnelError::Again) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn padding_transparency_does_not_alter_the_received_stream() {
        let (mut client, mut server) = paired_tunnels(4096, false).await;
        client.write(b"ab").await.unwrap();
        client.padding(10).await.unwrap();
        client.write(b"cd").await.unwrap();
        client.maybe_pad(8).await.unwrap();
        client.write(b"ef").await.unwrap();

        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 6 {
            match server.read(&mut buf).await {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(TunnelError::Again) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(got, b"abcdef");
    }
}
