//! FastCGI record framing
//!
//! Every record starts with the same 8-byte header:
//!
//! ```text
//! version | type | request id (u16 BE) | content length (u16 BE) | padding | reserved
//! ```
//!
//! followed by `content length` bytes of content and `padding` bytes that are
//! ignored.

pub const VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

pub const ROLE_RESPONDER: u16 = 1;
pub const FLAG_KEEP_CONN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
}

impl RecordType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            _ => return None,
        })
    }
}

/// `protocolStatus` of an `EndRequest` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::RequestComplete,
            1 => Self::CantMpxConn,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    /// Raw record type; see [`RecordHeader::record_type`].
    pub kind: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    #[inline]
    pub const fn new(kind: RecordType, request_id: u16, content_length: u16) -> Self {
        Self {
            version: VERSION_1,
            kind: kind as u8,
            request_id,
            content_length,
            padding_length: 0,
        }
    }

    #[inline]
    pub const fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.kind)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let [id_hi, id_lo] = self.request_id.to_be_bytes();
        let [len_hi, len_lo] = self.content_length.to_be_bytes();

        out.extend_from_slice(&[
            self.version,
            self.kind,
            id_hi,
            id_lo,
            len_hi,
            len_lo,
            self.padding_length,
            0,
        ]);
    }

    /// `None` when fewer than [`HEADER_LEN`] bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let head: &[u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;

        Some(Self {
            version: head[0],
            kind: head[1],
            request_id: u16::from_be_bytes([head[2], head[3]]),
            content_length: u16::from_be_bytes([head[4], head[5]]),
            padding_length: head[6],
        })
    }

    /// Header, content and padding.
    #[inline]
    pub const fn record_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

/// One complete record borrowed from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub header: RecordHeader,
    pub content: &'a [u8],
}

/// Reads the record at the front of `buf`.
///
/// Returns the record and the number of bytes it occupies, padding included,
/// or `None` while the record is still partial.
pub fn next_record(buf: &[u8]) -> Option<(Record<'_>, usize)> {
    let header = RecordHeader::decode(buf)?;
    let used = header.record_len();
    if buf.len() < used {
        return None;
    }

    let content = &buf[HEADER_LEN..HEADER_LEN + header.content_length as usize];
    Some((Record { header, content }, used))
}

/// Body of an `EndRequest` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    pub fn decode(content: &[u8]) -> Option<Self> {
        let body = content.get(..5)?;

        Some(Self {
            app_status: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            protocol_status: body[4],
        })
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.protocol_status == ProtocolStatus::RequestComplete as u8
    }
}

/// Name-value length prefix: one byte below 128, otherwise four bytes
/// big-endian with the top bit set.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let len = (len as u32) | 0x8000_0000;
        out.extend_from_slice(&len.to_be_bytes());
    }
}

/// Encodes one name-value pair of a `Params` stream.
pub fn build_param_packet(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + name.len() + value.len());
    encode_length(name.len(), &mut out);
    encode_length(value.len(), &mut out);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(value.as_bytes());
    out
}

pub fn build_begin_request(request_id: u16, keep_connection: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN * 2);
    RecordHeader::new(RecordType::BeginRequest, request_id, 8).encode(&mut out);

    let [role_hi, role_lo] = ROLE_RESPONDER.to_be_bytes();
    let flags = if keep_connection { FLAG_KEEP_CONN } else { 0 };
    out.extend_from_slice(&[role_hi, role_lo, flags, 0, 0, 0, 0, 0]);
    out
}

/// Appends `data` as records of `kind`, split at [`MAX_CONTENT_LEN`].
///
/// Nothing is written for empty `data`; stream terminators are explicit.
pub fn write_stream(kind: RecordType, request_id: u16, data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks(MAX_CONTENT_LEN) {
        RecordHeader::new(kind, request_id, chunk.len() as u16).encode(out);
        out.extend_from_slice(chunk);
    }
}

/// Empty record closing a `Params` or `Stdin` stream.
#[inline]
pub fn write_terminator(kind: RecordType, request_id: u16, out: &mut Vec<u8>) {
    RecordHeader::new(kind, request_id, 0).encode(out);
}

/// Encoded parameters followed by the empty `Params` terminator.
pub fn build_params_record(request_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + HEADER_LEN * 2);
    write_stream(RecordType::Params, request_id, payload, &mut out);
    write_terminator(RecordType::Params, request_id, &mut out);
    out
}

/// Request body followed by the empty `Stdin` terminator.
pub fn build_stdin_records(request_id: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + HEADER_LEN * 2);
    write_stream(RecordType::Stdin, request_id, data, &mut out);
    write_terminator(RecordType::Stdin, request_id, &mut out);
    out
}
