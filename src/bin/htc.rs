//! `htc` - httunnel client: bridges a local byte source to a remote
//! `hts` (directly or through an HTTP proxy), disguising the traffic as
//! an ordinary `POST`/`GET` pair.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tokio::net::TcpListener;

use httunnel::reactor::{drive_session, BufferFlush, Stdio};
use httunnel::{Destination, Tunnel, TunnelOptions};

#[derive(Parser, Debug)]
#[command(name = "htc", about = "Tunnel a byte stream through HTTP", version)]
#[command(group(ArgGroup::new("source").required(true).args(["device", "forward_port", "stdin_stdout"])))]
struct Args {
    /// Destination the tunnel server listens on, as `host:port`.
    destination: String,

    /// Forward a local device file's bytes through the tunnel.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Listen on this local TCP port and forward each connection through the tunnel.
    #[arg(long, value_name = "PORT")]
    forward_port: Option<u16>,

    /// Use this process's stdin/stdout as the local byte source.
    #[arg(long)]
    stdin_stdout: bool,

    /// Content-Length declared on each outbound HTTP body.
    #[arg(long, default_value_t = 4096)]
    content_length: usize,

    /// Pad every outbound body to exactly `content_length` bytes.
    #[arg(long)]
    strict_content_length: bool,

    /// Seconds of inactivity before a PAD1 keepalive is sent.
    #[arg(long, default_value_t = 60)]
    keep_alive: u64,

    /// Maximum age, in seconds, of an outbound HTTP body before forced rollover.
    #[arg(long, default_value_t = 300)]
    max_connection_age: u64,

    /// Proxy to dial instead of `destination` directly, as `host:port`.
    #[arg(long)]
    proxy: Option<String>,

    /// `Proxy-Authorization` header value.
    #[arg(long)]
    proxy_authorization: Option<String>,

    /// Read the `Proxy-Authorization` header value from this file.
    #[arg(long)]
    proxy_authorization_file: Option<PathBuf>,

    /// `User-Agent` header value.
    #[arg(long)]
    user_agent: Option<String>,

    /// Seconds of inactivity before padding up to `content_length` (buffer flush).
    #[arg(long)]
    timeout: Option<u64>,
}

fn parse_host_port(s: &str) -> Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {s:?}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in {s:?}"))?;
    Ok((host.to_owned(), port))
}

fn build_options(args: &Args) -> Result<TunnelOptions, Box<dyn std::error::Error>> {
    let mut options = TunnelOptions::default();
    options.content_length = args.content_length;
    options.strict_content_length = args.strict_content_length;
    options.keep_alive = Duration::from_secs(args.keep_alive);
    options.max_connection_age = Duration::from_secs(args.max_connection_age);
    options.user_agent = args.user_agent.clone();
    options.proxy_authorization = match (&args.proxy_authorization, &args.proxy_authorization_file) {
        (Some(_), Some(_)) => {
            return Err("--proxy-authorization and --proxy-authorization-file are mutually exclusive".into())
        }
        (Some(value), None) => Some(value.clone()),
        (None, Some(path)) => Some(std::fs::read_to_string(path)?.trim_end().to_owned()),
        (None, None) => None,
    };
    Ok(options)
}

async fn run_one_session(
    destination: Destination,
    options: TunnelOptions,
    buffer_flush: Option<BufferFlush>,
    external: &mut (impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin),
) -> Result<(), Box<dyn std::error::Error>> {
    let keep_alive = options.keep_alive;
    let mut tunnel = Tunnel::new_client(destination, options);
    tunnel.connect().await?;
    drive_session(&mut tunnel, external, keep_alive, buffer_flush).await?;
    tunnel.close().await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "htc exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (dest_host, dest_port) = parse_host_port(&args.destination)?;
    let proxy = args.proxy.as_deref().map(parse_host_port).transpose()?;
    let destination = Destination {
        host: dest_host,
        port: dest_port,
        proxy,
    };
    let options = build_options(&args)?;
    let buffer_flush = args.timeout.map(|secs| BufferFlush {
        block: options.content_length,
        timeout: Duration::from_secs(secs),
    });

    if args.stdin_stdout {
        let mut external = Stdio::new();
        run_one_session(destination, options, buffer_flush, &mut external).await?;
    } else if let Some(device) = &args.device {
        let mut external = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .await?;
        run_one_session(destination, options, buffer_flush, &mut external).await?;
    } else if let Some(port) = args.forward_port {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        loop {
            let (mut stream, peer) = listener.accept().await?;
            tracing::info!(%peer, "accepted forwarded connection");
            let destination = destination.clone();
            let options = options.clone();
            if let Err(e) = run_one_session(destination, options, buffer_flush, &mut stream).await {
                tracing::warn!(error = %e, "session ended with an error");
            }
        }
    }
    Ok(())
}
