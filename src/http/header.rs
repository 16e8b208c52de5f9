//! Start line, status line and header block codec.
//!
//! All offsets are absolute positions in the connection buffer. The codec
//! never copies bytes it has not fully validated: a line is only read once
//! its `CRLF` has arrived, and the header block only once its blank line has.

use crate::{
    config::{HeaderPolicy, HttpConfig},
    errors::{Error, ParseError},
    http::{
        body, query,
        request::ParseState,
        types::{HeaderType, MessageRole, Method},
    },
};
use memchr::{memchr, memmem};
use std::collections::HashMap;

const CRLF: &[u8] = b"\r\n";
const TERMINATOR: &[u8] = b"\r\n\r\n";

/// A single `Name: value` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    name: String,
    kind: HeaderType,
    value: String,
}

impl HeaderEntry {
    /// Known names are stored in their canonical spelling, unknown ones verbatim.
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        let kind = HeaderType::from_name(name);
        let name = match kind {
            HeaderType::Unrecognized => name.to_string(),
            known => known.as_str().to_string(),
        };

        Self {
            name,
            kind,
            value: value.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> HeaderType {
        self.kind
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Parsed `METHOD SP URI SP VERSION` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StartLine {
    pub method: Method,
    pub uri: String,
    pub version: String,
    /// Length of the line without its `CRLF`.
    pub length: usize,
}

/// Parsed `VERSION SP CODE [SP REASON]` line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub version: String,
    pub status: u16,
    pub length: usize,
}

/// Header state shared by requests and responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub(crate) role: MessageRole,
    pub(crate) method: Option<Method>,
    pub(crate) uri: String,
    pub(crate) path: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) version: String,
    pub(crate) entries: Vec<HeaderEntry>,
    /// Bytes from the end of the start line up to the blank-line terminator.
    pub(crate) header_byte_length: usize,
    /// The blank-line terminator has been located.
    pub(crate) complete: bool,
}

impl MessageHeader {
    #[inline]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub(crate) fn apply_start_line(&mut self, line: StartLine) {
        let (path, raw_query) = query::split_uri(&line.uri);
        self.path = path.to_string();
        self.query = query::parse_query(raw_query);
        self.method = Some(line.method);
        self.uri = line.uri;
        self.version = line.version;
    }

    /// Value of the first header named `name` (case-insensitive), `""` when absent.
    pub fn header(&self, name: &str) -> &str {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map_or("", |e| e.value.as_str())
    }

    /// Value of the first header of canonical type `kind`, `""` when absent.
    pub fn header_type(&self, kind: HeaderType) -> &str {
        self.entries
            .iter()
            .find(|e| e.kind == kind && kind != HeaderType::Unrecognized)
            .map_or("", |e| e.value.as_str())
    }

    #[inline]
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Appends a header; duplicates are kept.
    #[inline]
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push(HeaderEntry::new(name, value));
    }

    /// Replaces every header named `name` with a single entry.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
        self.add(name, value);
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Emits `Name: value\r\n` per entry in stored order.
    ///
    /// The caller appends the blank line.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        for entry in &self.entries {
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(entry.value.as_bytes());
            out.extend_from_slice(CRLF);
        }
    }
}

#[inline]
fn to_str(bytes: &[u8]) -> Result<&str, ParseError> {
    simdutf8::basic::from_utf8(bytes).map_err(|_| ParseError::InvalidEncoding)
}

/// Reads the request line. `Ok(None)` until its `CRLF` has arrived.
pub(crate) fn parse_start_line(buf: &[u8]) -> Result<Option<StartLine>, ParseError> {
    let Some(length) = memmem::find(buf, CRLF) else {
        return Ok(None);
    };
    let line = to_str(&buf[..length])?;

    let mut tokens = line.split(' ');
    let (Some(method), Some(uri), Some(version), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(ParseError::MalformedStartLine);
    };
    if version.is_empty() {
        return Err(ParseError::MalformedStartLine);
    }

    let method = Method::from_token(method)?;
    if !(uri.starts_with('/') || uri == "*" || uri.contains("://")) {
        return Err(ParseError::InvalidUri(uri.to_string()));
    }

    Ok(Some(StartLine {
        method,
        uri: uri.to_string(),
        version: version.to_string(),
        length,
    }))
}

/// Reads a response status line. `Ok(None)` until its `CRLF` has arrived.
pub(crate) fn parse_status_line(buf: &[u8]) -> Result<Option<StatusLine>, ParseError> {
    let Some(length) = memmem::find(buf, CRLF) else {
        return Ok(None);
    };
    let line = to_str(&buf[..length]).map_err(|_| ParseError::InvalidStatusLine)?;

    let mut tokens = line.splitn(3, ' ');
    let (Some(version), Some(code)) = (tokens.next(), tokens.next()) else {
        return Err(ParseError::InvalidStatusLine);
    };
    if !version.starts_with("HTTP/") || code.len() != 3 {
        return Err(ParseError::InvalidStatusLine);
    }
    let status = code.parse().map_err(|_| ParseError::InvalidStatusLine)?;

    Ok(Some(StatusLine {
        version: version.to_string(),
        status,
        length,
    }))
}

/// Reads the header block following a start line that ends at `start_offset`
/// (the position of its `CRLF`).
///
/// Returns the entries and the header byte length, the distance from
/// `start_offset` to the blank-line terminator. `Ok(None)` until the
/// terminator has arrived.
pub(crate) fn parse_headers(
    buf: &[u8],
    start_offset: usize,
    policy: HeaderPolicy,
) -> Result<Option<(Vec<HeaderEntry>, usize)>, ParseError> {
    let Some(relative) = memmem::find(&buf[start_offset..], TERMINATOR) else {
        return Ok(None);
    };

    let block = match relative {
        0 => &[][..],
        n => &buf[start_offset + CRLF.len()..start_offset + n],
    };
    let entries = parse_header_lines(block, policy)?;

    Ok(Some((entries, relative)))
}

/// Rejects a head of `len` bytes that is past `max_header_size`.
#[inline]
pub(crate) fn check_head_size(len: usize, config: &HttpConfig) -> Result<(), Error> {
    match len > config.max_header_size {
        true => Err(Error::HeaderTooLarge {
            limit: config.max_header_size,
        }),
        false => Ok(()),
    }
}

/// Header-block stage of both requests and responses.
///
/// Fills `header` and returns the next state with the declared body length,
/// `Ok(None)` until the blank line has arrived.
pub(crate) fn read_header_block(
    header: &mut MessageHeader,
    buf: &[u8],
    start_line_len: usize,
    config: &HttpConfig,
) -> Result<Option<(ParseState, usize)>, Error> {
    let Some((entries, header_len)) = parse_headers(buf, start_line_len, config.header_policy)? else {
        // Everything buffered so far is head.
        check_head_size(buf.len(), config)?;
        return Ok(None);
    };
    check_head_size(start_line_len + header_len + TERMINATOR.len(), config)?;

    header.entries = entries;
    header.header_byte_length = header_len;
    header.complete = true;

    let body_length = body::determine_length(header);
    body::check_limit(body_length, config)?;

    let next = match body_length {
        0 => ParseState::Complete,
        _ => ParseState::AwaitingBody {
            request_line_len: start_line_len,
            header_len,
        },
    };
    Ok(Some((next, body_length)))
}

/// Reads a CGI header block (no start line) at the front of `buf`.
///
/// Returns the entries and the offset where the body starts.
pub(crate) fn parse_cgi_headers(
    buf: &[u8],
    policy: HeaderPolicy,
) -> Result<(Vec<HeaderEntry>, usize), ParseError> {
    if buf.starts_with(CRLF) {
        return Ok((Vec::new(), CRLF.len()));
    }

    match memmem::find(buf, TERMINATOR) {
        Some(end) => Ok((parse_header_lines(&buf[..end], policy)?, end + TERMINATOR.len())),
        // Output without a header block is all body.
        None => Ok((Vec::new(), 0)),
    }
}

fn parse_header_lines(block: &[u8], policy: HeaderPolicy) -> Result<Vec<HeaderEntry>, ParseError> {
    if block.is_empty() {
        return Ok(Vec::new());
    }
    let block = to_str(block)?;
    let mut entries = Vec::new();

    for line in block.split("\r\n") {
        let Some(colon) = memchr(b':', line.as_bytes()) else {
            match policy {
                HeaderPolicy::Skip => {
                    tracing::debug!(line, "skipping header line without colon");
                    continue;
                }
                HeaderPolicy::Strict => return Err(ParseError::MalformedHeader(line.to_string())),
            }
        };

        let name = line[..colon].trim();
        let value = line[colon + 1..].trim();
        entries.push(HeaderEntry::new(name, value));
    }

    Ok(entries)
}
