use std::io;
use thiserror::Error as ThisError;

/// Errors produced while reading an HTTP start line or header block.
///
/// A parse error drops the request that produced it; the connection itself
/// stays open and may carry a new request.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ParseError {
    /// The start line is not exactly `METHOD SP URI SP VERSION`.
    #[error("malformed start line")]
    MalformedStartLine,
    /// The method token is not one of the known methods.
    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),
    /// The request target is neither an origin form (`/...`), `*`, nor an absolute URI.
    #[error("invalid request uri `{0}`")]
    InvalidUri(String),
    /// The status line of a response could not be read.
    #[error("invalid status line")]
    InvalidStatusLine,
    /// A header line has no `:` separator.
    ///
    /// Only produced when [`HeaderPolicy::Strict`](crate::HeaderPolicy) is selected.
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    /// The start line or header block is not valid UTF-8.
    #[error("start line or headers are not valid UTF-8")]
    InvalidEncoding,
}

/// Failures of the FastCGI gateway.
#[derive(Debug, PartialEq, ThisError)]
pub enum GatewayError {
    #[error("failed to connect to FastCGI upstream {address}: {source}")]
    Connect { address: String, source: IoError },
    #[error("failed to write to FastCGI upstream: {0}")]
    Write(IoError),
    #[error("failed to read from FastCGI upstream: {0}")]
    Read(IoError),
    #[error("FastCGI upstream closed the connection")]
    Closed,
    #[error("FastCGI upstream did not answer within the configured timeout")]
    Timeout,
    #[error("too many FastCGI requests in flight (limit {0})")]
    TooManyInFlight(usize),
    #[error("FastCGI upstream rejected the request (protocol status {0})")]
    Rejected(u8),
    #[error("FastCGI upstream sent an unreadable response: {0}")]
    InvalidResponse(ParseError),
}

/// The error type returned by the crate's fallible operations.
///
/// Unmatched routes are not errors: the dispatcher answers them with a `404`.
#[derive(Debug, PartialEq, ThisError)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The start line and headers outgrew `max_header_size`.
    #[error("request head exceeds the limit of {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The declared body length exceeds the configured absolute cap.
    #[error("body of {length} bytes exceeds the limit of {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },
    /// Fewer bytes than the declared body length are available yet.
    #[error("body truncated: expected {expected} bytes, {available} available")]
    TruncatedBody { expected: usize, available: usize },

    #[error("transport error: {0}")]
    Transport(IoError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: &'static str },
    #[error("protocol `{0}` is not served by the plain TCP transport")]
    UnsupportedProtocol(&'static str),
}

impl Error {
    /// Returns `true` for errors that only defer completion until more bytes arrive.
    #[inline]
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Error::TruncatedBody { .. })
    }

    /// Returns `true` when the connection must be closed after reporting the error.
    ///
    /// A malformed request only costs the request itself.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Error::Parse(_) | Error::Gateway(_))
    }
}

macro_rules! http_errors {
    ($($name:ident: $status_code:literal, $conn:literal, $len:literal => $text:literal;)*) => {
        impl Error {
            /// Static `HTTP/1.1` response announcing this error to the peer.
            pub(crate) const fn as_http(&self) -> &'static [u8] {
                match self { $(
                    Self::$name { .. } => concat!(
                        "HTTP/1.1 ", $status_code, "\r\n",
                        "Connection: ", $conn, "\r\n",
                        "Content-Type: text/plain\r\n",
                        "Content-Length: ", $len, "\r\n",
                        "\r\n",
                        $text
                    ).as_bytes(),
                )* }
            }
        }
    };
}

http_errors! {
    Parse: "400 Bad Request", "keep-alive", "11" => "Bad Request";
    HeaderTooLarge: "431 Request Header Fields Too Large", "close", "31" => "Request Header Fields Too Large";
    BodyTooLarge: "413 Payload Too Large", "close", "17" => "Payload Too Large";
    TruncatedBody: "400 Bad Request", "close", "11" => "Bad Request";
    Transport: "503 Service Unavailable", "close", "19" => "Service Unavailable";
    Gateway: "502 Bad Gateway", "keep-alive", "11" => "Bad Gateway";
    InvalidRoute: "500 Internal Server Error", "close", "21" => "Internal Server Error";
    UnsupportedProtocol: "505 HTTP Version Not Supported", "close", "26" => "HTTP Version Not Supported";
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(IoError(err))
    }
}

/// `io::Error` wrapper comparable by [`io::ErrorKind`].
#[derive(Debug)]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        IoError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_responses_declare_exact_length() {
        let cases = [
            Error::Parse(ParseError::MalformedStartLine),
            Error::HeaderTooLarge { limit: 1 },
            Error::BodyTooLarge { length: 2, limit: 1 },
            Error::TruncatedBody { expected: 2, available: 1 },
            Error::Transport(IoError(io::ErrorKind::BrokenPipe.into())),
            Error::Gateway(GatewayError::Timeout),
            Error::InvalidRoute { pattern: String::new(), reason: "" },
            Error::UnsupportedProtocol("https"),
        ];

        for err in cases {
            let text = std::str::from_utf8(err.as_http()).unwrap();
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            let declared = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .unwrap();

            assert_eq!(declared.parse::<usize>().unwrap(), body.len(), "{text}");

            let connection = if err.is_fatal() { "close" } else { "keep-alive" };
            assert!(head.contains(&format!("Connection: {connection}")), "{text}");
        }
    }

    #[test]
    fn io_errors_compare_by_kind() {
        let a: Error = io::Error::new(io::ErrorKind::TimedOut, "a").into();
        let b: Error = io::Error::new(io::ErrorKind::TimedOut, "b").into();
        let c: Error = io::Error::new(io::ErrorKind::BrokenPipe, "a").into();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Error::TruncatedBody { expected: 1, available: 0 }.is_incomplete());
        assert!(!a.is_incomplete());
    }
}
