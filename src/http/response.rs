//! HTTP response builder, serializer and client-side parser.

use crate::{
    config::{HeaderPolicy, HttpConfig},
    errors::{Error, ParseError},
    http::{
        body::{self, Body},
        header::{self, MessageHeader},
        request::ParseState,
        types::{reason_phrase, slice_to_usize, HeaderType, MessageRole, StatusCode},
    },
};

/// HTTP response.
///
/// Handlers receive one per request and fill it in with the fluent
/// builder; the dispatcher serializes it after routing. `Content-Length`
/// is added automatically when the handler did not set one.
///
/// # Examples
/// ```
/// use webgate::{Response, StatusCode};
///
/// let mut resp = Response::new();
/// resp.status(StatusCode::Created)
///     .header("Content-Type", "text/plain")
///     .body("done");
///
/// let wire = resp.serialize().unwrap();
/// assert!(wire.starts_with(b"HTTP/1.1 201 Created\r\n"));
/// assert!(wire.ends_with(b"Content-Length: 4\r\n\r\ndone"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: u16,
    header: MessageHeader,
    body: Body,
    should_send: bool,

    state: ParseState,
    status_line_length: usize,
    body_length: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    #[inline]
    pub fn new() -> Self {
        let header = MessageHeader {
            role: MessageRole::Response,
            version: "HTTP/1.1".to_string(),
            ..MessageHeader::default()
        };

        Self {
            status: StatusCode::Ok.as_u16(),
            header,
            body: Body::empty(),
            should_send: true,
            state: ParseState::AwaitingStartLine,
            status_line_length: 0,
            body_length: 0,
        }
    }
}

// Builder
impl Response {
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status.as_u16();
        self
    }

    /// Numeric status, for codes outside [`StatusCode`].
    #[inline]
    pub fn status_code(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Appends a header; duplicates are kept.
    #[inline]
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.header.add(name, value);
        self
    }

    /// Sets the body. `Content-Length` follows it unless set explicitly.
    #[inline]
    pub fn body(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        let content_type = self.header.header_type(HeaderType::ContentType).to_string();
        self.body = Body::from_bytes(content_type, data);
        self
    }

    /// Marks the connection for closing after this response.
    #[inline]
    pub fn close(&mut self) -> &mut Self {
        self.header.set("Connection", "close");
        self
    }

    /// `404 Not Found` with a short plain-text body.
    pub fn not_found(&mut self) -> &mut Self {
        self.status(StatusCode::NotFound)
            .header("Content-Type", "text/plain")
            .body("Not Found")
    }

    /// Keeps the dispatcher from sending this response, for handlers that
    /// already answered through another channel.
    #[inline]
    pub fn skip_send(&mut self) -> &mut Self {
        self.should_send = false;
        self
    }
}

// Accessors
impl Response {
    #[inline]
    pub fn get_status(&self) -> u16 {
        self.status
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.header.version
    }

    #[inline]
    pub fn headers(&self) -> &MessageHeader {
        &self.header
    }

    /// First header named `name` (case-insensitive), `""` when absent.
    #[inline]
    pub fn header_value(&self, name: &str) -> &str {
        self.header.header(name)
    }

    #[inline]
    pub fn get_body(&self) -> &Body {
        &self.body
    }

    #[inline]
    pub fn should_send(&self) -> bool {
        self.should_send
    }

    #[inline]
    pub(crate) fn closes_connection(&self) -> bool {
        self.header
            .header_type(HeaderType::Connection)
            .eq_ignore_ascii_case("close")
    }
}

// Serialization
impl Response {
    /// Renders status line, headers, blank line and body.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(128 + self.body.len());

        out.extend_from_slice(self.header.version.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        self.header.serialize(&mut out);
        if !self.header.contains("Content-Length") {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");

        self.body.write_to(&mut out)?;
        Ok(out)
    }
}

// Client-side parsing
impl Response {
    /// Attempts the next unfinished stage of a response read from a server.
    ///
    /// Same contract as [`Request::parse`](crate::Request::parse): `Ok(true)`
    /// when a stage finished, `Ok(false)` when more bytes are needed.
    /// Only `Content-Length` framing is understood.
    pub fn parse(&mut self, buf: &[u8], config: &HttpConfig) -> Result<bool, Error> {
        match self.state {
            ParseState::AwaitingStartLine => {
                let Some(line) = header::parse_status_line(buf)? else {
                    header::check_head_size(buf.len(), config)?;
                    return Ok(false);
                };

                self.status = line.status;
                self.header.version = line.version;
                self.status_line_length = line.length;
                self.state = ParseState::AwaitingHeaders {
                    request_line_len: line.length,
                };
                Ok(true)
            }
            ParseState::AwaitingHeaders { request_line_len } => {
                let Some((next, body_length)) =
                    header::read_header_block(&mut self.header, buf, request_line_len, config)?
                else {
                    return Ok(false);
                };

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
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    #[inline]
    pub fn total_wire_size(&self) -> usize {
        (self.status_line_length + self.header.header_byte_length + 4).saturating_add(self.body_length)
    }

    /// Converts CGI output (header block, blank line, body) into a response.
    ///
    /// A `Status:` header sets the status code and is not forwarded; without
    /// it the status is `200`. `Content-Length` is set to the body length.
    pub(crate) fn from_cgi(output: &[u8], policy: HeaderPolicy) -> Result<Self, ParseError> {
        let (entries, body_start) = header::parse_cgi_headers(output, policy)?;
        let mut resp = Response::new();

        for entry in entries {
            if entry.name().eq_ignore_ascii_case("Status") {
                let code = entry.value().as_bytes().get(..3).and_then(slice_to_usize);
                match code {
                    Some(code @ 100..=999) => resp.status = code as u16,
                    _ => return Err(ParseError::InvalidStatusLine),
                }
            } else if entry.kind() != HeaderType::ContentLength {
                resp.header.entries.push(entry);
            }
        }

        let data = &output[body_start..];
        resp.header.add("Content-Length", data.len().to_string());
        resp.body = Body::from_bytes(resp.header.header_type(HeaderType::ContentType), data);
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::*, Method, Request};

    #[test]
    fn serialize_adds_content_length() {
        let mut resp = Response::new();
        resp.header("Content-Type", "text/html").body("<b>hi</b>");

        assert_eq!(
            str_op(&resp.serialize().unwrap()),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 9\r\n\r\n<b>hi</b>"
        );
        assert_eq!(resp.get_body().content_type(), "text/html");
    }

    #[test]
    fn explicit_content_length_is_kept() {
        let mut resp = Response::new();
        resp.status_code(299).header("content-length", "0");

        assert_eq!(
            str_op(&resp.serialize().unwrap()),
            "HTTP/1.1 299 Unknown\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn helpers() {
        let mut resp = Response::new();
        resp.not_found().close().skip_send();

        assert_eq!(resp.get_status(), 404);
        assert!(resp.closes_connection());
        assert!(!resp.should_send());
        assert_eq!(resp.get_body().text().unwrap(), "Not Found");
        assert_eq!(resp.headers().role(), MessageRole::Response);
        assert_eq!(Request::new(Method::Get, "/").headers().role(), MessageRole::Request);
    }

    #[test]
    fn parse_incrementally() {
        let input = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nnopeHTTP/1.1";
        let config = HttpConfig::default();

        for chunk in [1, 4, 11, input.len()] {
            let mut resp = Response::new();
            let mut acc = Vec::new();
            for part in input.chunks(chunk) {
                acc.extend_from_slice(part);
                while !resp.is_complete() && resp.parse(&acc, &config).unwrap() {}
            }

            assert!(resp.is_complete());
            assert_eq!(resp.get_status(), 404);
            assert_eq!(resp.header_value("content-type"), "text/plain");
            assert_eq!(resp.get_body().text().unwrap(), "nopeH");
            assert_eq!(resp.total_wire_size(), input.len() - 7);
        }
    }

    #[test]
    fn parse_bad_status_line() {
        let mut resp = Response::new();
        assert_eq!(
            resp.parse(b"HTTP/1.1 OK\r\n\r\n", &HttpConfig::default()),
            Err(Error::Parse(ParseError::InvalidStatusLine))
        );
    }

    #[test]
    fn cgi_output() {
        #[rustfmt::skip]
        let cases: [(&[u8], Result<(u16, &str), ParseError>); 5] = [
            (b"Content-Type: text/html\r\n\r\n<p>hi</p>",                     Ok((200, "<p>hi</p>"))),
            (b"Status: 302 Found\r\nLocation: /login\r\n\r\n",               Ok((302, ""))),
            (b"Status: 404\r\nContent-Length: 999\r\n\r\nmissing",           Ok((404, "missing"))),
            (b"\r\nbody only",                                               Ok((200, "body only"))),
            (b"Status: abc\r\n\r\n",                                         Err(ParseError::InvalidStatusLine)),
        ];

        for (input, expected) in cases {
            let parsed = Response::from_cgi(input, HeaderPolicy::Skip)
                .map(|r| (r.get_status(), r.get_body().text().unwrap()));
            let expected = expected.map(|(s, b)| (s, b.to_string()));
            assert_eq!(parsed, expected, "{}", str_op(input));
        }

        let resp = Response::from_cgi(b"Status: 302 Found\r\nLocation: /login\r\n\r\n", HeaderPolicy::Skip)
            .unwrap();
        assert_eq!(resp.header_value("Location"), "/login");
        assert_eq!(resp.header_value("Status"), "");
        assert_eq!(resp.header_value("Content-Length"), "0");
    }
}
