//! Tunnel configuration.
//!
//! The Rust analogue of the original `tunnel_setopt`/`tunnel_getopt` pair:
//! a strongly typed struct instead of a name/value C API. Unknown option
//! names are therefore only reachable through [`TunnelOptions::set_named`] /
//! [`TunnelOptions::get_named`], which a CLI front-end uses to translate
//! flags into fields.

use std::time::Duration;

use crate::error::TunnelError;

/// Content-window size floor. Below this there isn't room for an OPEN
/// frame (4 bytes) plus a one-byte reserved DISCONNECT.
pub const MIN_WINDOW: usize = 5;

/// Tunable knobs of a [`Tunnel`](crate::tunnel::Tunnel).
///
/// Constructible only via [`Default`] and update syntax, the same
/// convention the pack's `ServerLimits`/`ConnLimits` use to keep the
/// struct open to new fields without breaking callers.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelOptions {
    /// Content-Length declared for each outbound HTTP body.
    pub content_length: usize,
    /// Pad every outbound body to exactly `content_length` bytes.
    pub strict_content_length: bool,
    /// Idle interval after which the reactor emits a PAD1 keepalive.
    pub keep_alive: Duration,
    /// Maximum age of an outbound HTTP body before forced rollover (client only).
    pub max_connection_age: Duration,
    /// `Proxy-Authorization` header value, deep-copied in and out.
    pub proxy_authorization: Option<String>,
    /// `User-Agent` header value, deep-copied in and out.
    pub user_agent: Option<String>,
    pub(crate) _priv: (),
}

impl Default for TunnelOptions {
    fn default() -> Self {
        TunnelOptions {
            content_length: 4096,
            strict_content_length: false,
            keep_alive: Duration::from_secs(60),
            max_connection_age: Duration::from_secs(300),
            proxy_authorization: None,
            user_agent: None,
            _priv: (),
        }
    }
}

impl TunnelOptions {
    /// Set an option by name, the shape a CLI or an embedding application
    /// that only has strings would use. Fails with `InvalidArgument` for
    /// an unrecognized name or an unparsable value.
    pub fn set_named(&mut self, name: &str, value: &str) -> Result<(), TunnelError> {
        match name {
            "strict_content_length" => {
                self.strict_content_length = parse_bool(value)?;
            }
            "keep_alive" => {
                self.keep_alive = Duration::from_secs(parse_secs(value)?);
            }
            "max_connection_age" => {
                self.max_connection_age = Duration::from_secs(parse_secs(value)?);
            }
            "content_length" => {
                let n: usize = value
                    .parse()
                    .map_err(|_| TunnelError::invalid_argument("content_length must be a non-negative integer"))?;
                if n < MIN_WINDOW {
                    return Err(TunnelError::invalid_argument(format!(
                        "content_length must be >= {MIN_WINDOW}"
                    )));
                }
                self.content_length = n;
            }
            "proxy_authorization" => {
                self.proxy_authorization = if value.is_empty() {
                    None
                } else {
                    Some(value.to_owned())
                };
            }
            "user_agent" => {
                self.user_agent = if value.is_empty() {
                    None
                } else {
                    Some(value.to_owned())
                };
            }
            other => {
                return Err(TunnelError::invalid_argument(format!("unknown option {other:?}")));
            }
        }
        Ok(())
    }

    /// Read an option back out by name. Mirrors `set_named`'s name set.
    pub fn get_named(&self, name: &str) -> Result<Option<String>, TunnelError> {
        Ok(match name {
            "strict_content_length" => Some(self.strict_content_length.to_string()),
            "keep_alive" => Some(self.keep_alive.as_secs().to_string()),
            "max_connection_age" => Some(self.max_connection_age.as_secs().to_string()),
            "content_length" => Some(self.content_length.to_string()),
            "proxy_authorization" => self.proxy_authorization.clone(),
            "user_agent" => self.user_agent.clone(),
            other => {
                return Err(TunnelError::invalid_argument(format!("unknown option {other:?}")));
            }
        })
    }

    /// Effective window `W'` reserving one byte for the trailing
    /// DISCONNECT simple frame on the client side.
    #[inline]
    pub(crate) fn client_window(&self) -> usize {
        self.content_length.saturating_sub(1)
    }
}

fn parse_bool(value: &str) -> Result<bool, TunnelError> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(TunnelError::invalid_argument(format!("not a boolean: {value:?}"))),
    }
}

fn parse_secs(value: &str) -> Result<u64, TunnelError> {
    value
        .parse()
        .map_err(|_| TunnelError::invalid_argument(format!("not a duration in seconds: {value:?}")))
}

/// Fixed-size staging buffer for reassembled DATA payloads, per §3.
pub(crate) const STAGING_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes the front-end reactor copies per wakeup between the external
/// byte source and the tunnel, per §4.5.
pub(crate) const REACTOR_CHUNK_SIZE: usize = 10240;

/// How long `accept` waits for the second half of a pair before tearing
/// the first half down, per §4.4.
pub(crate) const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close` drains the inbound channel for trailing frames, per §4.4.
pub(crate) const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_name_is_invalid_argument() {
        let mut opts = TunnelOptions::default();
        assert!(matches!(
            opts.set_named("bogus", "1"),
            Err(TunnelError::InvalidArgument(_))
        ));
        assert!(matches!(
            opts.get_named("bogus"),
            Err(TunnelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn known_options_round_trip_through_set_and_get() {
        let mut opts = TunnelOptions::default();
        opts.set_named("strict_content_length", "true").unwrap();
        assert_eq!(opts.get_named("strict_content_length").unwrap().as_deref(), Some("true"));

        opts.set_named("keep_alive", "30").unwrap();
        assert_eq!(opts.get_named("keep_alive").unwrap().as_deref(), Some("30"));

        opts.set_named("proxy_authorization", "Basic abc").unwrap();
        assert_eq!(
            opts.get_named("proxy_authorization").unwrap().as_deref(),
            Some("Basic abc")
        );

        opts.set_named("proxy_authorization", "").unwrap();
        assert_eq!(opts.get_named("proxy_authorization").unwrap(), None);
    }

    #[test]
    fn client_window_reserves_one_byte_for_disconnect() {
        let mut opts = TunnelOptions::default();
        opts.content_length = 10;
        assert_eq!(opts.client_window(), 9);
    }
}
