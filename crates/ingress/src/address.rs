//! Provider address parsing.
//!
//! A provider string has the shape of a URI reference: the path names the
//! provider/category hierarchy and the query string carries behavior flags.
//!
//! ```text
//! mobility/tourism?fastline=true
//! parking/bolzano
//! flights/ssim?test=2&test2=value
//! ```
//!
//! The path segments determine the routing key (`mobility.tourism`). The
//! routing key is derived here and nowhere else.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use ingress_common::{IngressError, IngressResult};

/// Query flag requesting expedited delivery.
pub const FASTLINE_FLAG: &str = "fastline";

/// Dot-joined path segments of a provider address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parsed, normalized provider address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAddress {
    scheme: Option<String>,
    authority: Option<String>,
    /// Normalized path, still percent-encoded.
    path: String,
    /// Decoded, non-empty path segments.
    segments: Vec<String>,
    query: Option<String>,
    fragment: Option<String>,
    params: BTreeMap<String, Option<String>>,
}

impl ProviderAddress {
    /// Parse and normalize a provider string.
    ///
    /// Fails with [`IngressError::InvalidProviderAddress`] when the string is
    /// not a syntactically valid URI reference or has no path.
    pub fn parse(provider: &str) -> IngressResult<Self> {
        if provider.is_empty() {
            return Err(invalid(provider, "empty provider"));
        }

        let (rest, fragment) = match provider.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (provider, None),
        };
        let (hier, query) = match rest.split_once('?') {
            Some((hier, query)) => (hier, Some(query)),
            None => (rest, None),
        };

        let (scheme, hier) = split_scheme(provider, hier)?;

        let (authority, raw_path) = match hier.strip_prefix("//") {
            Some(after) => {
                let end = after.find('/').unwrap_or(after.len());
                (Some(&after[..end]), &after[end..])
            }
            None => (None, hier),
        };

        if scheme.is_some() && authority.is_none() && !raw_path.starts_with('/') {
            // Opaque URI such as "mailto:someone": no hierarchical path.
            return Err(invalid(provider, "opaque URI has no path"));
        }

        if let Some(authority) = authority {
            check_component(provider, authority, is_authority_char)?;
        }
        check_component(provider, raw_path, is_path_char)?;
        if let Some(query) = query {
            check_component(provider, query, is_query_char)?;
        }
        if let Some(fragment) = fragment {
            check_component(provider, fragment, is_query_char)?;
        }

        let path = normalize_path(raw_path)
            .ok_or_else(|| invalid(provider, "path escapes its root"))?;

        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                percent_decode_str(segment)
                    .decode_utf8()
                    .map(|decoded| decoded.into_owned())
                    .map_err(|_| invalid(provider, "path is not valid UTF-8"))
            })
            .collect::<IngressResult<Vec<_>>>()?;

        if segments.is_empty() {
            return Err(invalid(provider, "no path component"));
        }

        let params = query.map(parse_query).unwrap_or_default();

        Ok(Self {
            scheme: scheme.map(str::to_string),
            authority: authority.map(str::to_string),
            path,
            segments,
            query: query.map(str::to_string),
            fragment: fragment.map(str::to_string),
            params,
        })
    }

    /// Decoded path segments, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Normalized path (percent-encoding preserved).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All decoded query flags. A key without `=` maps to `None`.
    pub fn flags(&self) -> &BTreeMap<String, Option<String>> {
        &self.params
    }

    /// Value of a single query flag, if present with a value.
    pub fn flag(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|value| value.as_deref())
    }

    /// Whether the address asks for the fast-path channel.
    pub fn is_fastline(&self) -> bool {
        self.flag(FASTLINE_FLAG) == Some("true")
    }

    /// Routing key: path segments joined with `.`.
    pub fn routing_key(&self) -> RoutingKey {
        RoutingKey(self.segments.join("."))
    }
}

impl fmt::Display for ProviderAddress {
    /// Writes the normalized URI form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}:", scheme)?;
        }
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

fn invalid(provider: &str, reason: &str) -> IngressError {
    IngressError::InvalidProviderAddress(format!("'{}': {}", provider, reason))
}

/// Split off a leading `scheme:` if the text before the first colon is one.
///
/// A colon inside the first segment of a scheme-less reference is a syntax
/// error, as in RFC 3986 section 4.2.
fn split_scheme<'a>(provider: &str, hier: &'a str) -> IngressResult<(Option<&'a str>, &'a str)> {
    let first_slash = hier.find('/').unwrap_or(hier.len());
    match hier[..first_slash].find(':') {
        Some(colon) => {
            let candidate = &hier[..colon];
            if is_scheme(candidate) {
                Ok((Some(candidate), &hier[colon + 1..]))
            } else {
                Err(invalid(provider, "expected scheme name before ':'"))
            }
        }
        None => Ok((None, hier)),
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn is_sub_delim(c: char) -> bool {
    matches!(c, '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '=')
}

/// Non-ASCII characters that are neither control nor whitespace are
/// accepted unescaped.
fn is_other(c: char) -> bool {
    !c.is_ascii() && !c.is_control() && !c.is_whitespace()
}

fn is_path_char(c: char) -> bool {
    is_unreserved(c) || is_sub_delim(c) || is_other(c) || matches!(c, ':' | '@' | '/')
}

fn is_query_char(c: char) -> bool {
    is_path_char(c) || c == '?'
}

fn is_authority_char(c: char) -> bool {
    is_unreserved(c) || is_sub_delim(c) || is_other(c) || matches!(c, ':' | '@' | '[' | ']')
}

/// Validate a component's characters and percent escapes.
fn check_component(provider: &str, component: &str, allowed: fn(char) -> bool) -> IngressResult<()> {
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next();
            let lo = chars.next();
            match (hi, lo) {
                (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {}
                _ => return Err(invalid(provider, "malformed percent escape")),
            }
        } else if !allowed(c) {
            return Err(invalid(provider, &format!("illegal character {:?}", c)));
        }
    }
    Ok(())
}

/// Remove `.` and `..` segments.
///
/// Returns `None` when a `..` would climb above the first segment.
fn normalize_path(path: &str) -> Option<String> {
    let absolute = path.starts_with('/');
    let body = path.strip_prefix('/').unwrap_or(path);

    let mut out: Vec<&str> = Vec::new();
    let mut segments = body.split('/').peekable();
    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        match segment {
            "." => {
                if last {
                    out.push("");
                }
            }
            ".." => {
                out.pop()?;
                if last {
                    out.push("");
                }
            }
            other => out.push(other),
        }
    }

    let joined = out.join("/");
    Some(if absolute { format!("/{}", joined) } else { joined })
}

/// Decode a query string into flags.
///
/// Keys and values are decoded individually; `+` decodes to a space. A key
/// with no `=` maps to `None`, a key with an empty value maps to `Some("")`.
/// Repeated keys keep the last value.
fn parse_query(query: &str) -> BTreeMap<String, Option<String>> {
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let has_value = pair.contains('=');
        if let Some((key, value)) = form_urlencoded::parse(pair.as_bytes()).next() {
            let value = has_value.then(|| value.into_owned());
            params.insert(key.into_owned(), value);
        }
    }
    params
}
