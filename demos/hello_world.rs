//! Smallest possible client: connect a tunnel and say hello.

use httunnel::{Destination, Tunnel, TunnelOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let destination = Destination {
        host: "127.0.0.1".to_owned(),
        port: 8080,
        proxy: None,
    };
    let mut tunnel = Tunnel::new_client(destination, TunnelOptions::default());
    tunnel.connect().await?;
    tunnel.write(b"Hello, world!").await?;
    tunnel.close().await?;
    Ok(())
}
