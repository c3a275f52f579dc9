//! httunnel - a byte-stream tunnel that disguises itself as ordinary HTTP traffic
//!
//! Wraps an arbitrary byte stream (a local TCP port, a device, stdin/stdout)
//! inside HTTP request and response bodies, so that firewalls, proxies, and
//! packet inspectors see nothing but a client slowly `POST`ing and `GET`ing
//! a pair of URLs. One side dials out (the client); the other accepts
//! connections and answers them (the server). What travels inside the
//! bodies is a small framed protocol (see [`frame`]) that the tunnel
//! engine ([`tunnel::Tunnel`]) assembles and disassembles transparently.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** and **HTTP/1.0** request/status lines and headers, just
//!   enough of each to carry the tunnel's framed payload.
//! - A private framing protocol inside the HTTP body: `OPEN`, `DATA`,
//!   `PADDING`, `ERROR`, `PAD1`, `CLOSE`, `DISCONNECT` (see [`frame::Tag`]).
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `httunnel` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! httunnel = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//!
//! ```no_run
//! use httunnel::{Destination, Tunnel, TunnelOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let destination = Destination {
//!         host: "example.com".to_owned(),
//!         port: 80,
//!         proxy: None,
//!     };
//!     let mut tunnel = Tunnel::new_client(destination, TunnelOptions::default());
//!     tunnel.connect().await?;
//!     tunnel.write(b"hello through the tunnel").await?;
//!     tunnel.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! See the `htc`/`hts` binaries in `src/bin/` for a complete client/server
//! front end built on top of this engine.
//!
//! # Use Cases
//!
//! - **Restrictive network egress** - reaching a destination through
//!   infrastructure that only permits outbound HTTP.
//! - **Captive or inspecting proxies** - traffic that must look like an
//!   ordinary web request/response pair on the wire.
//! - **Tunneling arbitrary byte streams** - TCP ports, serial devices,
//!   stdin/stdout - over the above.

pub(crate) mod error;
pub(crate) mod frame;
pub(crate) mod http;
pub(crate) mod io_util;
pub(crate) mod options;
pub mod reactor;
pub mod tunnel;

pub use crate::{
    error::{Result, TunnelError},
    http::{Method, StatusCode, Version},
    options::TunnelOptions,
    tunnel::{Destination, Tunnel},
};

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }
}
