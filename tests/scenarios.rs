//! End-to-end scenarios exercising the tunnel against a raw TCP peer,
//! checking things the in-module unit tests don't reach: exact wire
//! sizes in strict mode, rollover across multiple outbound bodies, and
//! pairing order independence.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use httunnel::{Destination, Tunnel, TunnelOptions};

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Read one HTTP head off `stream`, returning the request/status line plus
/// headers as text and whatever body bytes rode along in the same read.
async fn read_head_raw(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before a full head arrived");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).into_owned();
            return (head, buf[pos + 4..].to_vec());
        }
    }
}

async fn read_to_eof(stream: &mut TcpStream, mut body: Vec<u8>) -> Vec<u8> {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await.unwrap() {
            0 => return body,
            n => body.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn reply_ok(stream: &mut TcpStream, content_length: usize) {
    let response =
        format!("HTTP/1.1 200 OK\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n");
    stream.write_all(response.as_bytes()).await.unwrap();
}

/// Pull every DATA frame's payload out of one outbound body, in order,
/// appending it to `out`. Stops at CLOSE/DISCONNECT, same as a real reader
/// would once the body's meaningful content ends.
fn extract_data_payloads(body: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < body.len() {
        match body[i] {
            0x01 => i += 4,                                  // OPEN
            0x02 => {
                let len = u16::from_be_bytes([body[i + 1], body[i + 2]]) as usize;
                out.extend_from_slice(&body[i + 3..i + 3 + len]);
                i += 3 + len;
            }
            0x03 => {
                let len = u16::from_be_bytes([body[i + 1], body[i + 2]]) as usize;
                i += 3 + len; // PADDING
            }
            0x45 => i += 1, // PAD1
            0x46 | 0x47 => break, // CLOSE / DISCONNECT ends the body
            other => panic!("unexpected frame tag 0x{other:02x}"),
        }
    }
}

/// Accept connections off `listener` until `payload` has been fully
/// reassembled from POST bodies. GET connections are answered with a
/// canned 200 OK and otherwise ignored. Returns the number of POST bodies
/// it took.
async fn collect_outbound_bodies(listener: &TcpListener, window: usize, payload: &[u8]) -> usize {
    let mut reassembled = Vec::new();
    let mut bodies = 0;
    while reassembled.len() < payload.len() {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (head, trailing) = read_head_raw(&mut stream).await;
        if head.starts_with("GET ") {
            reply_ok(&mut stream, window).await;
            continue;
        }
        assert!(head.starts_with("POST "), "unexpected request line: {head}");
        let body = read_to_eof(&mut stream, trailing).await;
        assert_eq!(body.len(), window, "every outbound body must be exactly W bytes in strict mode");
        bodies += 1;
        extract_data_payloads(&body, &mut reassembled);
    }
    assert_eq!(reassembled, payload);
    bodies
}

/// S2: `W = 10`, strict on, a 3-byte write. Every outbound body produced
/// is exactly 10 bytes, and the reassembled payload is `"abc"`.
#[tokio::test]
async fn s2_strict_window_pads_every_outbound_body_to_exactly_w() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut options = TunnelOptions::default();
    options.content_length = 10;
    options.strict_content_length = true;
    let destination = Destination {
        host: addr.ip().to_string(),
        port: addr.port(),
        proxy: None,
    };

    let client_task = tokio::spawn(async move {
        let mut client = Tunnel::new_client(destination, options);
        client.connect().await.unwrap();
        client.write(b"abc").await.unwrap();
        client.close().await.unwrap();
    });

    collect_outbound_bodies(&listener, 10, b"abc").await;
    client_task.await.unwrap();
}

/// S3: `W = 20`, strict on, a 30-byte write. The write necessarily spans
/// more than one outbound body; concatenated DATA payloads equal the
/// original bytes, and every body is exactly `W` bytes.
#[tokio::test]
async fn s3_rollover_splits_a_write_across_multiple_outbound_bodies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut options = TunnelOptions::default();
    options.content_length = 20;
    options.strict_content_length = true;
    let destination = Destination {
        host: addr.ip().to_string(),
        port: addr.port(),
        proxy: None,
    };
    let payload: Vec<u8> = (0..30u8).collect();

    let client_task = tokio::spawn({
        let payload = payload.clone();
        async move {
            let mut client = Tunnel::new_client(destination, options);
            client.connect().await.unwrap();
            client.write(&payload).await.unwrap();
            client.close().await.unwrap();
        }
    });

    let bodies = collect_outbound_bodies(&listener, 20, &payload).await;
    assert!(bodies >= 2, "a 30-byte write into a 20-byte window must span multiple bodies");
    client_task.await.unwrap();
}

/// S4: the server sees `GET` before `POST`, the reverse of the order a
/// client naturally dials them in. Pairing still succeeds.
#[tokio::test]
async fn s4_pairing_is_independent_of_connection_order() {
    let mut server_options = TunnelOptions::default();
    server_options.content_length = 4096;
    let mut server = Tunnel::new_server(Some("127.0.0.1"), 0, server_options)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        server.accept().await.unwrap();
        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        while got.len() < 3 {
            match server.read(&mut buf).await {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) if e.is_again() => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        got
    });

    let mut get = TcpStream::connect(addr).await.unwrap();
    get.write_all(b"GET /index.html?crap=1 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let (get_head, _) = read_head_raw(&mut get).await;
    assert!(get_head.starts_with("HTTP/1.1 200"));

    let mut post = TcpStream::connect(addr).await.unwrap();
    let request = b"POST /index.html?crap=1 HTTP/1.1\r\nHost: x\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n\x01\x00\x01\x00\x02\x00\x03abc";
    post.write_all(request).await.unwrap();

    let got = server_task.await.unwrap();
    assert_eq!(got, b"abc");
}

/// S5: with no data traffic, PAD1 keepalives appear on the wire at
/// intervals no longer than `keep_alive`.
#[tokio::test]
async fn s5_idle_tunnel_emits_keepalive_pad1_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut options = TunnelOptions::default();
    options.keep_alive = Duration::from_millis(150);
    let window = options.content_length;
    let destination = Destination {
        host: addr.ip().to_string(),
        port: addr.port(),
        proxy: None,
    };

    let client_task = tokio::spawn(async move {
        let mut client = Tunnel::new_client(destination, options);
        client.connect().await.unwrap();
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            client.padding(1).await.unwrap();
        }
        client.close().await.unwrap();
    });

    let (mut post, _) = listener.accept().await.unwrap();
    let (post_head, post_trailing) = read_head_raw(&mut post).await;
    assert!(post_head.starts_with("POST "));

    let (mut get, _) = listener.accept().await.unwrap();
    let (get_head, _) = read_head_raw(&mut get).await;
    assert!(get_head.starts_with("GET "));
    reply_ok(&mut get, window).await;

    let body = read_to_eof(&mut post, post_trailing).await;
    let pad1_count = body.iter().filter(|&&b| b == 0x45).count();
    assert!(pad1_count >= 2, "expected at least two PAD1 keepalives, saw {pad1_count}");

    client_task.await.unwrap();
}
