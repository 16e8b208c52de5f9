//! Path-pattern routing.
//!
//! # Pattern syntax
//!
//! | Syntax          | Matches                                                |
//! |-----------------|--------------------------------------------------------|
//! | `text`          | the literal text                                       |
//! | `{name}`        | one or more characters other than `/`                  |
//! | `{name:type}`   | one or more characters of [`View`] `type`              |
//! | `(a\|b)`        | one of the alternatives                                |
//! | `{name:(a\|b)}` | one of the alternatives, bound as `name`               |
//! | `…?`            | after `}` or `)`: the token may match nothing          |
//!
//! An optional token directly after a `/` takes that slash with it, so
//! `/files/{name}?` matches both `/files` and `/files/report`.
//!
//! Matching is greedy and never backtracks: a variable consumes the longest
//! run its view allows, and a group takes the first alternative that fits,
//! alternatives being tried longest first.
//!
//! # Examples
//! ```
//! use webgate::{route::Route, Method};
//!
//! let route = Route::new(Method::Get, "/users/{id:numeric}/(posts|comments)");
//!
//! let args = route.match_path(Method::Get, "/users/42/posts").unwrap();
//! assert_eq!(args["id"], "42");
//!
//! assert!(route.match_path(Method::Get, "/users/abc/posts").is_none());
//! assert!(route.match_path(Method::Post, "/users/42/posts").is_none());
//! ```

use crate::{errors::Error, http::types::Method, Request};
use std::{collections::HashMap, fmt};

/// Character class a variable may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Untyped `{name}`: anything but `/`.
    Any,
    /// ASCII letters.
    Alpha,
    /// ASCII digits.
    Numeric,
    /// Anything but `/`, whitespace and control characters.
    String,
    /// Upper-case ASCII letters.
    Upper,
    /// Lower-case ASCII letters.
    Lower,
}

impl View {
    fn from_name(name: &str) -> Option<Self> {
        let view = match name {
            "alpha" => View::Alpha,
            "numeric" => View::Numeric,
            "string" => View::String,
            "upper" => View::Upper,
            "lower" => View::Lower,
            _ => return None,
        };
        Some(view)
    }

    const fn name(&self) -> Option<&'static str> {
        match self {
            View::Any => None,
            View::Alpha => Some("alpha"),
            View::Numeric => Some("numeric"),
            View::String => Some("string"),
            View::Upper => Some("upper"),
            View::Lower => Some("lower"),
        }
    }

    #[inline]
    fn accepts(&self, byte: u8) -> bool {
        match self {
            View::Any => byte != b'/',
            View::Alpha => byte.is_ascii_alphabetic(),
            View::Numeric => byte.is_ascii_digit(),
            View::String => byte != b'/' && !byte.is_ascii_whitespace() && !byte.is_ascii_control(),
            View::Upper => byte.is_ascii_uppercase(),
            View::Lower => byte.is_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Literal(String),
    Variable {
        name: String,
        view: View,
    },
    /// Alternatives sorted longest first, then in descending order.
    Group {
        name: Option<String>,
        alternatives: Vec<String>,
    },
}

/// A compiled fragment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteToken {
    pub kind: TokenKind,
    pub optional: bool,
    /// Text an optional token must be preceded by when it matches.
    pub prefix: String,
}

impl RouteToken {
    fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            optional: false,
            prefix: String::new(),
        }
    }

    /// Bytes consumed at the start of `rest`, with the bound value if any.
    fn consume<'p>(&self, rest: &'p str) -> Option<(usize, Option<&'p str>)> {
        match &self.kind {
            TokenKind::Literal(text) => rest.starts_with(text.as_str()).then_some((text.len(), None)),
            TokenKind::Variable { view, .. } => {
                let len = rest.bytes().take_while(|b| view.accepts(*b)).count();
                (len > 0).then(|| (len, Some(&rest[..len])))
            }
            TokenKind::Group { alternatives, .. } => alternatives
                .iter()
                .find(|alt| rest.starts_with(alt.as_str()))
                .map(|alt| (alt.len(), Some(&rest[..alt.len()]))),
        }
    }

    fn name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Variable { name, .. } => Some(name),
            TokenKind::Group { name, .. } => name.as_deref(),
            TokenKind::Literal(_) => None,
        }
    }
}

impl fmt::Display for RouteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)?;
        match &self.kind {
            TokenKind::Literal(text) => f.write_str(text)?,
            TokenKind::Variable { name, view } => match view.name() {
                Some(view) => write!(f, "{{{name}:{view}}}")?,
                None => write!(f, "{{{name}}}")?,
            },
            TokenKind::Group { name, alternatives } => match name {
                Some(name) => write!(f, "{{{name}:({})}}", alternatives.join("|"))?,
                None => write!(f, "({})", alternatives.join("|"))?,
            },
        }
        if self.optional {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// A compiled pattern guarded by an HTTP method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    pattern: String,
    tokens: Vec<RouteToken>,
}

impl Route {
    /// Compiles `pattern`.
    ///
    /// # Panics
    /// If the pattern is invalid; see [`Route::try_new`].
    #[track_caller]
    pub fn new(method: Method, pattern: &str) -> Self {
        match Self::try_new(method, pattern) {
            Ok(route) => route,
            Err(err) => panic!("{err}"),
        }
    }

    /// Compiles `pattern`, failing with [`Error::InvalidRoute`].
    pub fn try_new(method: Method, pattern: &str) -> Result<Self, Error> {
        Ok(Self {
            method,
            pattern: pattern.to_string(),
            tokens: compile(pattern)?,
        })
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[inline]
    pub fn tokens(&self) -> &[RouteToken] {
        &self.tokens
    }

    /// Matches `path` and returns the bound variables, `None` on mismatch.
    pub fn match_path(&self, method: Method, path: &str) -> Option<HashMap<String, String>> {
        if method != self.method {
            return None;
        }

        let mut args = HashMap::new();
        let mut pos = 0;

        for token in &self.tokens {
            let rest = &path[pos..];
            let attempt = rest
                .strip_prefix(token.prefix.as_str())
                .and_then(|after| token.consume(after))
                .map(|(len, value)| (token.prefix.len() + len, value));

            match attempt {
                Some((len, value)) => {
                    if let (Some(name), Some(value)) = (token.name(), value) {
                        args.insert(name.to_string(), value.to_string());
                    }
                    pos += len;
                }
                None if token.optional => {}
                None => return None,
            }
        }

        (pos == path.len()).then_some(args)
    }

    /// Matches a request, binding its arguments on a full match only.
    pub fn is_match(&self, request: &mut Request) -> bool {
        match self.match_path(request.method(), request.path()) {
            Some(args) => {
                request.set_args(args);
                true
            }
            None => false,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

#[inline]
fn invalid(pattern: &str, reason: &'static str) -> Error {
    Error::InvalidRoute {
        pattern: pattern.to_string(),
        reason,
    }
}

type TokenParser = fn(&str, &str) -> Result<RouteToken, Error>;

fn compile(pattern: &str) -> Result<Vec<RouteToken>, Error> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        let (close, token): (char, TokenParser) = match ch {
            '{' => ('}', parse_variable),
            '(' => (')', parse_group),
            '}' | ')' => return Err(invalid(pattern, "unbalanced closing bracket")),
            _ => {
                literal.push(ch);
                continue;
            }
        };

        let end = pattern[start + 1..]
            .find(close)
            .map(|i| start + 1 + i)
            .ok_or_else(|| invalid(pattern, "unterminated token"))?;
        let mut token = token(pattern, &pattern[start + 1..end])?;

        while chars.next_if(|(i, _)| *i <= end).is_some() {}
        if chars.next_if(|(_, c)| *c == '?').is_some() {
            token.optional = true;
            if literal.ends_with('/') {
                literal.pop();
                token.prefix.push('/');
            }
        }

        if !literal.is_empty() {
            tokens.push(RouteToken::new(TokenKind::Literal(std::mem::take(&mut literal))));
        }
        tokens.push(token);
    }

    if !literal.is_empty() {
        tokens.push(RouteToken::new(TokenKind::Literal(literal)));
    }
    Ok(tokens)
}

fn parse_variable(pattern: &str, body: &str) -> Result<RouteToken, Error> {
    let (name, kind) = body.split_once(':').unwrap_or((body, ""));
    if name.is_empty() {
        return Err(invalid(pattern, "variable without a name"));
    }

    if let Some(group) = kind.strip_prefix('(') {
        let group = group
            .strip_suffix(')')
            .ok_or_else(|| invalid(pattern, "unterminated group"))?;
        let mut token = parse_group(pattern, group)?;
        if let TokenKind::Group { name: slot, .. } = &mut token.kind {
            *slot = Some(name.to_string());
        }
        return Ok(token);
    }

    let view = match kind {
        "" => View::Any,
        kind => View::from_name(kind).ok_or_else(|| invalid(pattern, "unknown variable type"))?,
    };

    Ok(RouteToken::new(TokenKind::Variable {
        name: name.to_string(),
        view,
    }))
}

fn parse_group(pattern: &str, body: &str) -> Result<RouteToken, Error> {
    let mut alternatives: Vec<String> = body.split('|').map(str::to_string).collect();
    if alternatives.iter().any(String::is_empty) {
        return Err(invalid(pattern, "empty group alternative"));
    }

    alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| b.cmp(a)));

    Ok(RouteToken::new(TokenKind::Group {
        name: None,
        alternatives,
    }))
}
