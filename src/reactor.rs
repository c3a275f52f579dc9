//! The front-end reactor: bridges an external byte stream (a forwarded
//! TCP port, a device, stdin/stdout) to a connected [`Tunnel`], copying
//! bytes in both directions and keeping the tunnel alive with padding
//! while idle.
//!
//! Grounded in the source's front-end `poll(2)` loop (`htc.c`/`hts.c`'s
//! `main` event loop), translated to a `tokio::select!` over three
//! futures instead of a single blocking `poll` call: the external
//! stream's next read, the tunnel's readiness, and a computed timeout.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;

use crate::error::{Result, TunnelError};
use crate::options::REACTOR_CHUNK_SIZE;
use crate::tunnel::Tunnel;

/// The process's stdin/stdout as a single duplex stream, for `--stdin-stdout`.
pub struct Stdio {
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
}

impl Stdio {
    pub fn new() -> Self {
        Stdio {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for Stdio {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for Stdio {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stdio {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdout).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_shutdown(cx)
    }
}

/// Optional client-side write-buffer flush: pad up to the next multiple
/// of `block` bytes if nothing has been written for `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct BufferFlush {
    pub block: usize,
    pub timeout: Duration,
}

/// Drive one session: copy bytes between `external` and `tunnel` until
/// either side reaches clean EOF or a hard error, sending PAD1 keepalives
/// (and, if `buffer_flush` is set, padding up to a block boundary) while
/// idle. Returns once the session has ended; the caller is responsible
/// for closing `tunnel` and `external` and for looping to the next
/// session if it wants one.
pub async fn drive_session<S>(
    tunnel: &mut Tunnel,
    external: &mut S,
    keep_alive: Duration,
    buffer_flush: Option<BufferFlush>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut last_write = Instant::now();
    let mut chunk = vec![0u8; REACTOR_CHUNK_SIZE];

    loop {
        let keepalive_remaining = keep_alive.saturating_sub(last_write.elapsed());
        let (wait_for, is_buffer_flush) = match buffer_flush {
            Some(bf) if bf.timeout < keepalive_remaining => (bf.timeout, true),
            _ => (keepalive_remaining, false),
        };

        tokio::select! {
            biased;

            read = external.read(&mut chunk) => {
                match read.map_err(TunnelError::Io)? {
                    0 => return Ok(()),
                    n => {
                        let mut written = 0;
                        while written < n {
                            match tunnel.write(&chunk[written..n]).await {
                                Ok(w) => written += w,
                                Err(TunnelError::Again) => continue,
                                Err(e) => return Err(e),
                            }
                        }
                        last_write = Instant::now();
                    }
                }
            }

            ready = tunnel.readable() => {
                ready?;
                match tunnel.read(&mut chunk).await {
                    Ok(0) => return Ok(()),
                    Ok(n) => external.write_all(&chunk[..n]).await.map_err(TunnelError::Io)?,
                    Err(TunnelError::Again) => {}
                    Err(e) => return Err(e),
                }
            }

            _ = tokio::time::sleep(wait_for) => {
                if is_buffer_flush {
                    let block = buffer_flush.expect("is_buffer_flush implies Some").block;
                    if tunnel.maybe_pad(block).await? > 0 {
                        last_write = Instant::now();
                    }
                } else {
                    tunnel.padding(1).await?;
                    last_write = Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::TunnelOptions;
    use crate::tunnel::Destination;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_bytes_until_external_eof() {
        let mut server_opts = TunnelOptions::default();
        server_opts.content_length = 4096;
        let mut server = Tunnel::new_server(Some("127.0.0.1"), 0, server_opts).await.unwrap();
        let addr = server.local_addr().unwrap();

        let client_opts = TunnelOptions::default();
        let destination = Destination {
            host: addr.ip().to_string(),
            port: addr.port(),
            proxy: None,
        };
        let mut client = Tunnel::new_client(destination, client_opts);

        let server_task = tokio::spawn(async move {
            server.accept().await.unwrap();
            let mut sink = Vec::new();
            let mut buf = [0u8; 64];
            loop {
                match server.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => sink.extend_from_slice(&buf[..n]),
                    Err(TunnelError::Again) => continue,
                    Err(e) => panic!("server read failed: {e}"),
                }
            }
            sink
        });

        client.connect().await.unwrap();

        let (mut external, mut far_end) = duplex(256);
        far_end.write_all(b"relayed over the tunnel").await.unwrap();
        drop(far_end);

        drive_session(&mut client, &mut external, Duration::from_secs(30), None)
            .await
            .unwrap();
        client.close().await.unwrap();

        let sink = server_task.await.unwrap();
        assert_eq!(sink, b"relayed over the tunnel");
    }
}
