//! Server that accepts one tunnel and echoes back whatever it reads.

use httunnel::{Tunnel, TunnelError, TunnelOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut tunnel = Tunnel::new_server(None, 8080, TunnelOptions::default()).await?;
    tunnel.accept().await?;

    let mut buf = [0u8; 4096];
    loop {
        match tunnel.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tunnel.write(&buf[..n]).await?;
            }
            Err(TunnelError::Again) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    tunnel.close().await?;
    Ok(())
}
