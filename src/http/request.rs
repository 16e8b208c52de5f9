use crate::{
    client::ClientTransport,
    config::HttpConfig,
    errors::Error,
    http::{
        body::{self, Body},
        header::{self, MessageHeader},
        types::{HeaderType, Method, Protocol},
    },
    server::dispatcher::ConnectionId,
};
use std::{collections::HashMap, net::SocketAddr};

/// Progress of an incoming request through the byte stream.
///
/// Offsets recorded by a finished stage are carried into the next one so a
/// stage is never parsed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    AwaitingStartLine,
    AwaitingHeaders {
        request_line_len: usize,
    },
    AwaitingBody {
        request_line_len: usize,
        header_len: usize,
    },
    Complete,
}

/// HTTP request, either parsed from a connection or built for sending.
///
/// # Input format
///
/// ```text
/// METHOD SP URI SP VERSION CRLF
/// (Name: value CRLF)*
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// - `CRLF` is required exactly; a bare `LF` does not end a line.
/// - The start line and header block must be valid `UTF-8`; the body may be anything.
/// - Only `Content-Length` framing is understood. Without it the body is empty.
/// - Header lines without a colon are handled per [`HeaderPolicy`](crate::HeaderPolicy).
#[derive(Debug, Default)]
pub struct Request {
    header: MessageHeader,
    connection_id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    protocol: Protocol,
    body: Body,
    args: HashMap<String, String>,

    state: ParseState,
    request_line_length: usize,
    body_length: usize,
}

impl Request {
    /// Outgoing request for [`HttpClient`](crate::HttpClient).
    ///
    /// # Examples
    /// ```
    /// use webgate::{Method, Request};
    ///
    /// let req = Request::new(Method::Post, "/submit?lang=en")
    ///     .header("X-Trace", "42")
    ///     .body("application/json", r#"{"ok":true}"#);
    ///
    /// assert_eq!(req.path(), "/submit");
    /// assert_eq!(req.query_value("lang"), "en");
    /// ```
    pub fn new(method: Method, uri: &str) -> Self {
        let mut req = Request::default();
        req.header.apply_start_line(header::StartLine {
            method,
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
            length: 0,
        });
        req.header.complete = true;
        req.state = ParseState::Complete;
        req
    }

    #[inline]
    pub(crate) fn incoming(connection_id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        Request {
            connection_id,
            remote_addr,
            ..Request::default()
        }
    }

    /// Appends a header.
    #[inline]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.header.add(name, value);
        self
    }

    /// Sets an in-memory body.
    #[inline]
    pub fn body(mut self, content_type: &str, data: impl Into<Vec<u8>>) -> Self {
        self.body = Body::from_bytes(content_type, data);
        self.body_length = self.body.len();
        self
    }
}

// Parsing
impl Request {
    /// Attempts the next unfinished stage against the accumulated bytes.
    ///
    /// Returns `Ok(true)` when that stage succeeded and `Ok(false)` when more
    /// bytes are needed (or the request is already complete). Call again
    /// while it returns `true` and [`Request::is_complete`] is `false`.
    ///
    /// # Errors
    /// - [`Error::Parse`] for a malformed start line or header block
    /// - [`Error::HeaderTooLarge`] once the unfinished head outgrows `max_header_size`
    /// - [`Error::BodyTooLarge`] once the declared length exceeds the configured cap
    pub fn parse(&mut self, buf: &[u8], config: &HttpConfig) -> Result<bool, Error> {
        match self.state {
            ParseState::AwaitingStartLine => {
                let Some(line) = header::parse_start_line(buf)? else {
                    header::check_head_size(buf.len(), config)?;
                    return Ok(false);
                };

                self.request_line_length = line.length;
                self.state = ParseState::AwaitingHeaders {
                    request_line_len: line.length,
                };
                self.header.apply_start_line(line);
                Ok(true)
            }
            ParseState::AwaitingHeaders { request_line_len } => {
                let Some((next, body_length)) =
                    header::read_header_block(&mut self.header, buf, request_line_len, config)?
                else {
                    return Ok(false);
                };

                if self
                    .header
                    .header_type(HeaderType::Upgrade)
                    .eq_ignore_ascii_case("websocket")
                {
                    self.protocol = Protocol::Ws;
                }

                self.body_length = body_length;
                self.state = next;
                Ok(true)
            }
            ParseState::AwaitingBody {
                request_line_len,
                header_len,
            } => {
                let offset = request_line_len + header_len + 4;
                let Some(body) = body::read_body(buf, offset, self.body_length, &self.header, config)? else {
                    return Ok(false);
                };

                self.body = body;
                self.state = ParseState::Complete;
                Ok(true)
            }
            ParseState::Complete => Ok(false),
        }
    }

    #[inline]
    pub fn state(&self) -> ParseState {
        self.state
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Number of bytes this request occupies on the wire.
    ///
    /// Exact once the header block has been parsed; bytes past it belong to
    /// the next request on the connection.
    #[inline]
    pub fn total_wire_size(&self) -> usize {
        (self.request_line_length + self.header.header_byte_length + 4).saturating_add(self.body_length)
    }
}

// Public API
impl Request {
    #[inline]
    pub fn method(&self) -> Method {
        self.header.method.unwrap_or(Method::Get)
    }

    #[inline]
    pub fn uri(&self) -> &str {
        &self.header.uri
    }

    /// Request target up to the first `?`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.header.path
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.header.version
    }

    #[inline]
    pub fn query(&self) -> &HashMap<String, String> {
        &self.header.query
    }

    /// Decoded query parameter, `""` when absent.
    #[inline]
    pub fn query_value(&self, name: &str) -> &str {
        self.header.query.get(name).map_or("", String::as_str)
    }

    /// First header named `name` (case-insensitive), `""` when absent.
    #[inline]
    pub fn header_value(&self, name: &str) -> &str {
        self.header.header(name)
    }

    #[inline]
    pub fn headers(&self) -> &MessageHeader {
        &self.header
    }

    #[inline]
    pub fn get_body(&self) -> &Body {
        &self.body
    }

    /// Declared body length.
    #[inline]
    pub fn body_length(&self) -> usize {
        self.body_length
    }

    /// Path variable bound by the matching route, `""` when absent.
    #[inline]
    pub fn arg(&self, name: &str) -> &str {
        self.args.get(name).map_or("", String::as_str)
    }

    #[inline]
    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    #[inline]
    pub(crate) fn set_args(&mut self, args: HashMap<String, String>) {
        self.args = args;
    }

    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[inline]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

// Client role
impl Request {
    /// Renders the start line and header block, blank line included.
    ///
    /// `Host`, `User-Agent` and `Accept` are added when missing, and
    /// `Content-Type`/`Content-Length` when a body is present.
    pub fn render_head(&self, host: &str, user_agent: &str) -> Vec<u8> {
        let mut header = self.header.clone();

        if !header.contains("Host") {
            header.add("Host", host);
        }
        if !header.contains("User-Agent") {
            header.add("User-Agent", user_agent);
        }
        if !header.contains("Accept") {
            header.add("Accept", "*/*");
        }
        if !self.body.is_empty() {
            if !header.contains("Content-Type") && !self.body.content_type().is_empty() {
                header.add("Content-Type", self.body.content_type());
            }
            header.set("Content-Length", self.body.len().to_string());
        }

        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method().as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.header.uri.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.header.version.as_bytes());
        out.extend_from_slice(b"\r\n");
        header.serialize(&mut out);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Writes the request as two writes: header block, then body.
    ///
    /// Fails with [`Error::Transport`] on the first failed write; nothing is retried.
    pub fn send<T: ClientTransport + ?Sized>(
        &self,
        transport: &mut T,
        host: &str,
        user_agent: &str,
    ) -> Result<(), Error> {
        transport.write(&self.render_head(host, user_agent))?;

        if !self.body.is_empty() {
            transport.write(&self.body.bytes()?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HeaderPolicy, errors::ParseError, tools::*};

    const POST: &[u8] = b"POST /upload/report?lang=en&x=%2F HTTP/1.1\r\n\
        Host: localhost\r\n\
        Content-Type: text/plain\r\n\
        Content-Length: 11\r\n\
        X-Empty:\r\n\
        \r\n\
        hello world";

    fn parse_all(req: &mut Request, buf: &[u8], config: &HttpConfig) -> Result<(), Error> {
        while !req.is_complete() && req.parse(buf, config)? {}
        Ok(())
    }

    fn snapshot(req: &Request) -> (Method, String, Vec<(String, String)>, Vec<u8>, HashMap<String, String>) {
        (
            req.method(),
            req.path().to_string(),
            req.headers()
                .entries()
                .iter()
                .map(|e| (e.name().to_string(), e.value().to_string()))
                .collect(),
            req.get_body().bytes().unwrap().into_owned(),
            req.query().clone(),
        )
    }

    #[test]
    fn parse_full_request() {
        let config = HttpConfig::default();
        let mut req = Request::incoming(3, None);
        parse_all(&mut req, POST, &config).unwrap();

        assert!(req.is_complete());
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.uri(), "/upload/report?lang=en&x=%2F");
        assert_eq!(req.path(), "/upload/report");
        assert_eq!(req.version(), "HTTP/1.1");
        assert_eq!(req.query_value("lang"), "en");
        assert_eq!(req.query_value("x"), "/");
        assert_eq!(req.header_value("content-type"), "text/plain");
        assert_eq!(req.header_value("X-Empty"), "");
        assert_eq!(req.headers().entries().len(), 4);
        assert_eq!(req.get_body().text().unwrap(), "hello world");
        assert_eq!(req.connection_id(), 3);
        assert_eq!(req.protocol(), Protocol::Http);
    }

    #[test]
    fn stages_advance_one_at_a_time() {
        let config = HttpConfig::default();
        let mut req = Request::default();

        assert_eq!(req.parse(POST, &config), Ok(true));
        assert_eq!(req.state(), ParseState::AwaitingHeaders { request_line_len: 42 });
        assert_eq!(req.parse(POST, &config), Ok(true));
        assert!(matches!(req.state(), ParseState::AwaitingBody { .. }));
        assert_eq!(req.parse(POST, &config), Ok(true));
        assert!(req.is_complete());
        assert_eq!(req.parse(POST, &config), Ok(false));
    }

    #[test]
    fn incremental_equivalence() {
        let config = HttpConfig::default();
        let mut whole = Request::default();
        parse_all(&mut whole, POST, &config).unwrap();
        let expected = snapshot(&whole);

        for chunk in [1, 2, 3, 5, 7, 13, 64] {
            let mut req = Request::default();
            let mut acc = Vec::new();

            for part in POST.chunks(chunk) {
                acc.extend_from_slice(part);
                parse_all(&mut req, &acc, &config).unwrap();
            }

            assert!(req.is_complete(), "chunk {chunk}");
            assert_eq!(snapshot(&req), expected, "chunk {chunk}");
        }

        for split in 0..POST.len() {
            let mut req = Request::default();
            parse_all(&mut req, &POST[..split], &config).unwrap();
            parse_all(&mut req, POST, &config).unwrap();
            assert_eq!(snapshot(&req), expected, "split {split}");
        }
    }

    #[test]
    fn exact_framing_with_pipelined_request() {
        let config = HttpConfig::default();
        let second = b"GET /next HTTP/1.1\r\n\r\n";

        let mut buf = POST.to_vec();
        buf.extend_from_slice(second);

        let mut first = Request::default();
        parse_all(&mut first, &buf, &config).unwrap();
        assert_eq!(first.total_wire_size(), POST.len());
        assert_eq!(first.get_body().text().unwrap(), "hello world");

        let rest = &buf[first.total_wire_size()..];
        let mut next = Request::default();
        parse_all(&mut next, rest, &config).unwrap();
        assert!(next.is_complete());
        assert_eq!(next.path(), "/next");
        assert_eq!(next.total_wire_size(), second.len());
    }

    #[test]
    fn wire_size_without_headers() {
        #[rustfmt::skip]
        let cases: [&[u8]; 3] = [
            b"GET / HTTP/1.1\r\n\r\n",
            b"GET /a HTTP/1.0\r\nHost: x\r\n\r\n",
            b"PUT /b HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc",
        ];

        for input in cases {
            let mut req = Request::default();
            parse_all(&mut req, input, &HttpConfig::default()).unwrap();
            assert!(req.is_complete());
            assert_eq!(req.total_wire_size(), input.len(), "{}", str_op(input));
        }
    }

    #[test]
    fn waits_for_missing_body_bytes() {
        let config = HttpConfig::default();
        let mut req = Request::default();
        let partial = &POST[..POST.len() - 3];

        parse_all(&mut req, partial, &config).unwrap();
        assert!(!req.is_complete());
        assert_eq!(req.parse(partial, &config), Ok(false));

        parse_all(&mut req, POST, &config).unwrap();
        assert!(req.is_complete());
    }

    #[test]
    fn errors() {
        let strict = HttpConfig {
            header_policy: HeaderPolicy::Strict,
            max_body_size: Some(4),
            ..HttpConfig::default()
        };

        #[rustfmt::skip]
        let cases: [(&[u8], Error); 4] = [
            (b"FETCH / HTTP/1.1\r\n\r\n",       ParseError::UnsupportedMethod("FETCH".into()).into()),
            (b"GET nope HTTP/1.1\r\n\r\n",      ParseError::InvalidUri("nope".into()).into()),
            (b"GET / HTTP/1.1\r\nbad\r\n\r\n",  ParseError::MalformedHeader("bad".into()).into()),
            (b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n", Error::BodyTooLarge { length: 5, limit: 4 }),
        ];

        for (input, expected) in cases {
            let mut req = Request::default();
            assert_eq!(parse_all(&mut req, input, &strict), Err(expected), "{}", str_op(input));
        }
    }

    #[test]
    fn oversized_head_is_rejected() {
        let config = HttpConfig {
            max_header_size: 32,
            ..HttpConfig::default()
        };
        let too_large: Result<(), Error> = Err(Error::HeaderTooLarge { limit: 32 });

        // Unterminated start line.
        let mut req = Request::default();
        assert_eq!(req.parse(&[b'G'; 33], &config), Err(Error::HeaderTooLarge { limit: 32 }));

        // Header block still growing.
        let mut req = Request::default();
        let mut buf = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        assert_eq!(parse_all(&mut req, &buf, &config), Ok(()));
        buf.extend_from_slice(&[b'a'; 16]);
        assert_eq!(parse_all(&mut req, &buf, &config), too_large);

        // Complete but too long.
        let mut req = Request::default();
        let input = b"GET / HTTP/1.1\r\nX-Pad: aaaaaaaaaaaaaa\r\n\r\n";
        assert_eq!(parse_all(&mut req, input, &config), too_large);

        let mut req = Request::default();
        assert_eq!(parse_all(&mut req, b"GET / HTTP/1.1\r\nX-Pad: a\r\n\r\n", &config), Ok(()));
        assert!(req.is_complete());
    }

    #[test]
    fn wire_size_saturates() {
        let config = HttpConfig {
            max_body_size: None,
            ..HttpConfig::default()
        };
        let input = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);

        let mut req = Request::default();
        parse_all(&mut req, input.as_bytes(), &config).unwrap();
        assert!(matches!(req.state(), ParseState::AwaitingBody { .. }));
        assert_eq!(req.total_wire_size(), usize::MAX);
    }

    #[test]
    fn websocket_upgrade_detected() {
        let mut req = Request::default();
        let input = b"GET /chat HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        parse_all(&mut req, input, &HttpConfig::default()).unwrap();
        assert_eq!(req.protocol(), Protocol::Ws);
    }

    #[test]
    fn render_client_request() {
        let req = Request::new(Method::Post, "/api")
            .header("Accept", "application/json")
            .body("text/plain", "ping");

        let head = req.render_head("example.org", "webgate-test");
        assert_eq!(
            str_op(&head),
            "POST /api HTTP/1.1\r\n\
             Accept: application/json\r\n\
             Host: example.org\r\n\
             User-Agent: webgate-test\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: 4\r\n\
             \r\n"
        );

        let mut transport = RecordingClient::default();
        req.send(&mut transport, "example.org", "webgate-test").unwrap();
        assert_eq!(transport.writes.len(), 2);
        assert_eq!(transport.writes[1], b"ping");
    }

    #[test]
    fn send_stops_at_failed_write() {
        let req = Request::new(Method::Put, "/x").body("", "data");
        let mut transport = RecordingClient {
            fail_writes: true,
            ..RecordingClient::default()
        };

        assert!(matches!(
            req.send(&mut transport, "h", "ua"),
            Err(Error::Transport(_))
        ));
        assert!(transport.writes.is_empty());
    }
}
