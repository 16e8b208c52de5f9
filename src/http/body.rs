//! Message bodies, kept in memory or spooled to an anonymous temporary file.

use crate::{
    config::HttpConfig,
    errors::Error,
    http::{header::MessageHeader, query, types::slice_to_usize, types::HeaderType},
};
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    io::{Read, Write},
};
use tempfile::NamedTempFile;

/// Body length declared by `Content-Length`; absent or non-numeric is `0`.
#[inline]
pub fn determine_length(header: &MessageHeader) -> usize {
    slice_to_usize(header.header_type(HeaderType::ContentLength).as_bytes()).unwrap_or(0)
}

/// Rejects a declared length above the configured absolute cap.
#[inline]
pub(crate) fn check_limit(length: usize, config: &HttpConfig) -> Result<(), Error> {
    match config.max_body_size {
        Some(limit) if length > limit => Err(Error::BodyTooLarge { length, limit }),
        _ => Ok(()),
    }
}

/// Body stage of both requests and responses, `Ok(None)` while bytes are missing.
///
/// `offset` is where the body starts: start line, header block and the
/// terminating blank line.
pub(crate) fn read_body(
    buf: &[u8],
    offset: usize,
    length: usize,
    header: &MessageHeader,
    config: &HttpConfig,
) -> Result<Option<Body>, Error> {
    let content_type = header.header_type(HeaderType::ContentType);
    match Body::consume(buf, offset, length, content_type, config) {
        Ok(body) => Ok(Some(body)),
        Err(err) if err.is_incomplete() => Ok(None),
        Err(err) => Err(err),
    }
}

enum Storage {
    Empty,
    Memory(Vec<u8>),
    File { file: NamedTempFile, len: usize },
}

/// An owned message body.
pub struct Body {
    content_type: String,
    storage: Storage,
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.storage {
            Storage::Empty => "empty",
            Storage::Memory(_) => "memory",
            Storage::File { .. } => "file",
        };
        f.debug_struct("Body")
            .field("content_type", &self.content_type)
            .field("storage", &storage)
            .field("len", &self.len())
            .finish()
    }
}

impl Body {
    #[inline]
    pub const fn empty() -> Self {
        Self {
            content_type: String::new(),
            storage: Storage::Empty,
        }
    }

    /// In-memory body, used when building outgoing messages.
    pub fn from_bytes(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            content_type: content_type.into(),
            storage: match data.is_empty() {
                true => Storage::Empty,
                false => Storage::Memory(data),
            },
        }
    }

    /// Copies `length` bytes starting at `offset` out of `buf`.
    ///
    /// The body is spooled to a temporary file when `config.temp_file` is set
    /// or `length` exceeds `config.max_body_file_size`.
    ///
    /// # Errors
    /// - [`Error::BodyTooLarge`] past `config.max_body_size` (fatal to the request)
    /// - [`Error::TruncatedBody`] while fewer than `length` bytes are available (retry later)
    /// - [`Error::Transport`] if the temporary file cannot be written
    pub fn consume(
        buf: &[u8],
        offset: usize,
        length: usize,
        content_type: &str,
        config: &HttpConfig,
    ) -> Result<Self, Error> {
        check_limit(length, config)?;

        let available = buf.len().saturating_sub(offset);
        if available < length {
            return Err(Error::TruncatedBody {
                expected: length,
                available,
            });
        }

        let data = &buf[offset..offset + length];
        let storage = match length {
            0 => Storage::Empty,
            _ if config.temp_file || length > config.max_body_file_size => {
                let mut file = NamedTempFile::new()?;
                file.write_all(data)?;
                file.flush()?;
                tracing::debug!(length, path = %file.path().display(), "spooled body to file");
                Storage::File { file, len: length }
            }
            _ => Storage::Memory(data.to_vec()),
        };

        Ok(Self {
            content_type: content_type.to_string(),
            storage,
        })
    }

    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Empty => 0,
            Storage::Memory(data) => data.len(),
            Storage::File { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when the body lives in a temporary file.
    #[inline]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, Storage::File { .. })
    }

    /// Body bytes; spooled bodies are read back from disk.
    pub fn bytes(&self) -> Result<Cow<'_, [u8]>, Error> {
        match &self.storage {
            Storage::Empty => Ok(Cow::Borrowed(&[])),
            Storage::Memory(data) => Ok(Cow::Borrowed(data)),
            Storage::File { file, len } => {
                let mut data = Vec::with_capacity(*len);
                file.reopen()?.read_to_end(&mut data)?;
                Ok(Cow::Owned(data))
            }
        }
    }

    /// Body as UTF-8 text, invalid sequences replaced.
    pub fn text(&self) -> Result<String, Error> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// Other content types yield an empty map.
    pub fn form_values(&self) -> Result<HashMap<String, String>, Error> {
        let essence = self.content_type.split(';').next().unwrap_or("").trim();
        if !essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            return Ok(HashMap::new());
        }
        Ok(query::parse_form(&self.text()?))
    }

    /// Appends the body bytes to `out`.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        match &self.storage {
            Storage::Empty => {}
            Storage::Memory(data) => out.extend_from_slice(data),
            Storage::File { file, .. } => {
                file.reopen()?.read_to_end(out)?;
            }
        }
        Ok(())
    }
}
