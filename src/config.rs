//! Server, body-storage and gateway configuration
//!
//! # Examples
//!
//! ```
//! use webgate::HttpConfig;
//! use std::time::Duration;
//!
//! let config = HttpConfig {
//!     server_port: 8081,
//!     keep_alive_timeout: Duration::from_secs(10),
//!     max_body_size: Some(1024 * 1024),
//!     ..HttpConfig::default() // Required line
//! };
//!
//! assert_eq!(config.bind_address(), "0.0.0.0:8081");
//! ```

use std::{path::PathBuf, time::Duration};

/// Transport protocol served by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProtocol {
    Http,
    /// Requires a TLS transport; the built-in TCP transport refuses it.
    Https,
}

impl HttpProtocol {
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpProtocol::Http => "http",
            HttpProtocol::Https => "https",
        }
    }
}

/// What to do with a header line that has no `:` separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderPolicy {
    /// Ignore the line and keep reading headers (default).
    #[default]
    Skip,
    /// Reject the message with [`ParseError::MalformedHeader`](crate::ParseError::MalformedHeader).
    Strict,
}

/// Complete configuration of a server, client or FastCGI gateway.
///
/// # Body storage
///
/// Request bodies are kept in memory unless one of the following holds,
/// in which case they are spooled to an anonymous temporary file:
/// - `temp_file` is `true` (always spool)
/// - the declared `Content-Length` exceeds `max_body_file_size`
///
/// Independently, a body longer than `max_body_size` is rejected with
/// [`Error::BodyTooLarge`](crate::Error::BodyTooLarge) and the connection is closed.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Always spool request bodies to a temporary file (default: `false`).
    pub temp_file: bool,

    /// Bodies larger than this are spooled to a temporary file (default: `1 MiB`).
    pub max_body_file_size: usize,

    /// Absolute cap on a request body (default: `Some(32 MiB)`), `None` disables it.
    pub max_body_size: Option<usize>,

    /// Cap on the start line plus header block, terminator included (default: `16 KiB`).
    ///
    /// A head that grows past it without its blank line is rejected with
    /// [`Error::HeaderTooLarge`](crate::Error::HeaderTooLarge) and the connection is closed.
    pub max_header_size: usize,

    /// Protocol served by the listener (default: [`HttpProtocol::Http`]).
    pub http_protocol: HttpProtocol,

    /// Listening address (default: `0.0.0.0`).
    ///
    /// Also reported to FastCGI applications as `SERVER_ADDR`.
    pub server_address: String,

    /// Listening port (default: `8080`).
    pub server_port: u16,

    /// Document root (default: `.`).
    ///
    /// FastCGI `SCRIPT_FILENAME` is this folder joined with the request path.
    pub root_folder: PathBuf,

    /// PEM certificate for [`HttpProtocol::Https`] (default: empty).
    pub ssl_certificate: PathBuf,

    /// PEM private key for [`HttpProtocol::Https`] (default: empty).
    pub ssl_key: PathBuf,

    /// Idle time after a response before the connection is closed
    /// (default: `5s`). [`Duration::ZERO`] disables the keep-alive timer.
    pub keep_alive_timeout: Duration,

    /// Value of the FastCGI `SERVER_NAME` parameter (default: `localhost`).
    pub server_name: String,

    /// Header lines without a colon are skipped or rejected (default: [`HeaderPolicy::Skip`]).
    pub header_policy: HeaderPolicy,

    /// Maximum number of FastCGI requests awaiting their `EndRequest` record (default: `1024`).
    ///
    /// Request ids are 16-bit and wrap around; the bound keeps a wrapped id
    /// from ever colliding with a live one. Values above `65535` are clamped.
    pub max_fcgi_in_flight: usize,

    /// How long the gateway waits for a complete FastCGI response (default: `30s`).
    pub fcgi_timeout: Duration,

    /// Connect and read timeout of [`HttpClient`](crate::HttpClient) (default: `10s`).
    pub client_timeout: Duration,

    /// `User-Agent` sent by [`HttpClient`](crate::HttpClient) (default: `webgate/<version>`).
    pub user_agent: String,

    /// Size of a single socket read (default: `8 KiB`).
    pub read_buffer_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            temp_file: false,
            max_body_file_size: 1024 * 1024,
            max_body_size: Some(32 * 1024 * 1024),
            max_header_size: 16 * 1024,
            http_protocol: HttpProtocol::Http,
            server_address: "0.0.0.0".to_string(),
            server_port: 8080,
            root_folder: PathBuf::from("."),
            ssl_certificate: PathBuf::new(),
            ssl_key: PathBuf::new(),
            keep_alive_timeout: Duration::from_secs(5),
            server_name: "localhost".to_string(),
            header_policy: HeaderPolicy::Skip,
            max_fcgi_in_flight: 1024,
            fcgi_timeout: Duration::from_secs(30),
            client_timeout: Duration::from_secs(10),
            user_agent: concat!("webgate/", env!("CARGO_PKG_VERSION")).to_string(),
            read_buffer_size: 8 * 1024,

            _priv: (),
        }
    }
}

impl HttpConfig {
    /// `address:port` string the listener binds to.
    #[inline]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }

    #[inline]
    pub(crate) fn keep_alive(&self) -> Option<Duration> {
        (!self.keep_alive_timeout.is_zero()).then_some(self.keep_alive_timeout)
    }

    #[inline]
    pub(crate) fn fcgi_in_flight_limit(&self) -> usize {
        self.max_fcgi_in_flight.clamp(1, u16::MAX as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_zero_disables_timer() {
        let config = HttpConfig {
            keep_alive_timeout: Duration::ZERO,
            ..HttpConfig::default()
        };
        assert_eq!(config.keep_alive(), None);
        assert_eq!(
            HttpConfig::default().keep_alive(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn in_flight_limit_is_clamped() {
        #[rustfmt::skip]
        let cases = [
            (0,         1),
            (1,         1),
            (1024,      1024),
            (70_000,    65_535),
        ];

        for (value, expected) in cases {
            let config = HttpConfig {
                max_fcgi_in_flight: value,
                ..HttpConfig::default()
            };
            assert_eq!(config.fcgi_in_flight_limit(), expected);
        }
    }
}
