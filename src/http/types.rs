//! Core HTTP protocol types and utilities

use crate::errors::ParseError;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;

    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// Parsed case-insensitively; serialized in upper case.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Trace,
    Connect,
}

impl Method {
    pub(crate) fn from_token(token: &str) -> Result<Self, ParseError> {
        let method = match token.to_ascii_uppercase().as_str() {
            "OPTIONS" => Method::Options,
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            _ => return Err(ParseError::UnsupportedMethod(token.to_string())),
        };

        Ok(method)
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ROLE

/// Which side of an exchange a [`MessageHeader`](crate::MessageHeader) belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum MessageRole {
    #[default]
    Request,
    Response,
}

// PROTOCOL

/// Protocol negotiated by a request, derived from its `Upgrade` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    #[default]
    Http,
    /// `Upgrade: websocket` was requested. The upgrade itself is not performed.
    Ws,
}

// HEADER TYPE

macro_rules! header_types {
    ($($name:ident => $text:literal,)+) => {
        /// Canonical header names.
        ///
        /// Names outside this table are kept verbatim as
        /// [`HeaderType::Unrecognized`] so they serialize unchanged.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum HeaderType {
            $(
                #[doc = concat!("`", $text, "`")]
                $name,
            )+
            Unrecognized,
        }

        impl HeaderType {
            /// Case-insensitive lookup of a header name.
            pub fn from_name(name: &str) -> Self {
                $(
                    if name.eq_ignore_ascii_case($text) {
                        return HeaderType::$name;
                    }
                )+
                HeaderType::Unrecognized
            }

            /// Canonical spelling, empty for [`HeaderType::Unrecognized`].
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(HeaderType::$name => $text,)+
                    HeaderType::Unrecognized => "",
                }
            }
        }
    };
}

header_types! {
    Accept => "Accept",
    AcceptCharset => "Accept-Charset",
    AcceptEncoding => "Accept-Encoding",
    AcceptDatetime => "Accept-Datetime",
    AcceptLanguage => "Accept-Language",
    Authorization => "Authorization",
    CacheControl => "Cache-Control",
    Connection => "Connection",
    ContentEncoding => "Content-Encoding",
    ContentLength => "Content-Length",
    ContentMd5 => "Content-MD5",
    ContentType => "Content-Type",
    Cookie => "Cookie",
    Date => "Date",
    Expect => "Expect",
    Forwarded => "Forwarded",
    From => "From",
    Http2Settings => "HTTP2-Settings",
    Host => "Host",
    IfMatch => "If-Match",
    IfModifiedSince => "If-Modified-Since",
    IfNoneMatch => "If-None-Match",
    IfRange => "If-Range",
    IfUnmodifiedSince => "If-Unmodified-Since",
    MaxForwards => "Max-Forwards",
    Origin => "Origin",
    Pragma => "Pragma",
    Prefer => "Prefer",
    ProxyAuthorization => "Proxy-Authorization",
    Range => "Range",
    Referer => "Referer",
    Te => "TE",
    Trailer => "Trailer",
    TransferEncoding => "Transfer-Encoding",
    UserAgent => "User-Agent",
    Upgrade => "Upgrade",
    Via => "Via",
    Warning => "Warning",
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($($name:ident = ($num:expr, $str:expr);)+) => {
        /// HTTP status codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            #[inline]
            pub const fn as_u16(&self) -> u16 {
                *self as u16
            }

            #[inline]
            pub const fn reason(&self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            pub const fn from_u16(code: u16) -> Option<Self> {
                match code { $(
                    $num => Some(StatusCode::$name),
                )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NonAuthoritativeInformation = (203, "Non Authoritative Information");
    NoContent = (204, "No Content");
    ResetContent = (205, "Reset Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PreconditionFailed = (412, "Precondition Failed");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    ExpectationFailed = (417, "Expectation Failed");
    UnprocessableEntity = (422, "Unprocessable Entity");
    UpgradeRequired = (426, "Upgrade Required");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

/// Reason phrase for any numeric status, `"Unknown"` outside the table.
#[inline]
pub(crate) fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code).map_or("Unknown", |s| s.reason())
}
