//! URL query string and form body decoding.

use memchr::memchr;
use std::collections::HashMap;

/// Splits a request target on its first `?`.
///
/// Returns the path and the raw query (empty when there is none).
///
/// ```
/// use webgate::query::split_uri;
///
/// assert_eq!(split_uri("/search?q=rust&page=2"), ("/search", "q=rust&page=2"));
/// assert_eq!(split_uri("/index.html"), ("/index.html", ""));
/// assert_eq!(split_uri("/a?b?c=1"), ("/a", "b?c=1"));
/// ```
#[inline]
pub fn split_uri(uri: &str) -> (&str, &str) {
    match memchr(b'?', uri.as_bytes()) {
        Some(pos) => (&uri[..pos], &uri[pos + 1..]),
        None => (uri, ""),
    }
}

/// Decodes a `&`-separated list of `key=value` pairs.
///
/// Tokens without exactly one `=` are dropped, as are tokens whose key or
/// value does not decode to valid UTF-8. Later duplicates overwrite earlier
/// ones.
///
/// ```
/// use webgate::query::parse_query;
///
/// let query = parse_query("name=J%C3%BCrgen&flag&a=b=c&city=Paris");
/// assert_eq!(query.len(), 2);
/// assert_eq!(query["name"], "Jürgen");
/// assert_eq!(query["city"], "Paris");
/// ```
pub fn parse_query(query: &str) -> HashMap<String, String> {
    collect(query, false)
}

/// Same as [`parse_query`], additionally decoding `+` as a space the way
/// `application/x-www-form-urlencoded` bodies encode it.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    collect(body, true)
}

fn collect(data: &str, plus_as_space: bool) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for token in data.split('&') {
        let bytes = token.as_bytes();
        let Some(eq) = memchr(b'=', bytes) else {
            continue;
        };
        if memchr(b'=', &bytes[eq + 1..]).is_some() {
            continue;
        }

        let (Some(key), Some(value)) = (
            decode(&token[..eq], plus_as_space),
            decode(&token[eq + 1..], plus_as_space),
        ) else {
            continue;
        };

        result.insert(key, value);
    }

    result
}

#[inline]
fn decode(raw: &str, plus_as_space: bool) -> Option<String> {
    if plus_as_space && raw.contains('+') {
        let raw = raw.replace('+', " ");
        return urlencoding::decode(&raw).ok().map(|s| s.into_owned());
    }
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}
