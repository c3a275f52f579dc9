//! `hts` - httunnel server: accepts paired `POST`/`GET` connections that
//! disguise a byte stream as HTTP, then bridges it to a local device,
//! a forwarded TCP port, or this process's stdin/stdout.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tokio::net::TcpStream;

use httunnel::reactor::{drive_session, Stdio};
use httunnel::{Tunnel, TunnelOptions};

#[derive(Parser, Debug)]
#[command(name = "hts", about = "Accept an HTTP-disguised tunnel and bridge it locally", version)]
#[command(group(ArgGroup::new("source").required(true).args(["device", "forward_port", "stdin_stdout"])))]
struct Args {
    /// Address to listen on for incoming tunnel connections, as `[host:]port`.
    listen: String,

    /// Bridge accepted tunnels to this local device file.
    #[arg(long)]
    device: Option<PathBuf>,

    /// Dial `127.0.0.1:PORT` for each accepted tunnel and bridge to it.
    #[arg(long, value_name = "PORT")]
    forward_port: Option<u16>,

    /// Bridge the first accepted tunnel to this process's stdin/stdout, then exit.
    #[arg(long)]
    stdin_stdout: bool,

    /// Content-Length advertised on each outbound HTTP body.
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
}

fn parse_listen(s: &str) -> Result<(Option<String>, u16), Box<dyn std::error::Error>> {
    match s.rsplit_once(':') {
        Some((host, port)) => Ok((Some(host.to_owned()), port.parse()?)),
        None => Ok((None, s.parse()?)),
    }
}

async fn bridge_one(tunnel: &mut Tunnel, keep_alive: Duration, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.stdin_stdout {
        let mut external = Stdio::new();
        drive_session(tunnel, &mut external, keep_alive, None).await?;
    } else if let Some(device) = &args.device {
        let mut external = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .await?;
        drive_session(tunnel, &mut external, keep_alive, None).await?;
    } else if let Some(port) = args.forward_port {
        let mut external = TcpStream::connect(("127.0.0.1", port)).await?;
        drive_session(tunnel, &mut external, keep_alive, None).await?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "hts exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (host, port) = parse_listen(&args.listen)?;

    let mut options = TunnelOptions::default();
    options.content_length = args.content_length;
    options.strict_content_length = args.strict_content_length;
    options.keep_alive = Duration::from_secs(args.keep_alive);
    options.max_connection_age = Duration::from_secs(args.max_connection_age);
    let keep_alive = options.keep_alive;

    let mut tunnel = Tunnel::new_server(host.as_deref(), port, options).await?;
    tracing::info!(addr = %tunnel.local_addr()?, "listening for tunnel connections");

    loop {
        tunnel.accept().await?;
        if let Err(e) = bridge_one(&mut tunnel, keep_alive, &args).await {
            tracing::warn!(error = %e, "tunnel session ended with an error");
        }
        tunnel.close().await?;
        if args.stdin_stdout {
            break;
        }
    }
    Ok(())
}
