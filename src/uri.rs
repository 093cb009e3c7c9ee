//! URI references, RFC 3986 resolution, and the per-host resolution cache.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("empty scheme")]
    EmptyScheme,
    #[error("invalid character {found:?} at offset {offset}")]
    InvalidChar { found: char, offset: usize },
}

/// A parsed URI reference, absolute or relative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri {
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    pub fn parse(input: &str) -> Result<Uri, UriError> {
        if let Some((offset, found)) = input.char_indices().find(|(_, c)| c.is_whitespace() || c.is_control()) {
            return Err(UriError::InvalidChar { found, offset });
        }
        let mut rest = input;
        let mut uri = Uri::default();

        if let Some(end) = rest.find(|c| matches!(c, ':' | '/' | '?' | '#')) {
            if rest.as_bytes()[end] == b':' {
                let scheme = &rest[..end];
                let mut chars = scheme.chars();
                match chars.next() {
                    None => return Err(UriError::EmptyScheme),
                    Some(c) if c.is_ascii_alphabetic() => {}
                    Some(found) => return Err(UriError::InvalidChar { found, offset: 0 }),
                }
                if let Some((i, found)) = scheme
                    .char_indices()
                    .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
                {
                    return Err(UriError::InvalidChar { found, offset: i });
                }
                uri.scheme = Some(scheme.to_ascii_lowercase());
                rest = &rest[end + 1..];
            }
        }
        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(after.len());
            uri.authority = Some(after[..end].to_string());
            rest = &after[end..];
        }
        let end = rest.find(|c| matches!(c, '?' | '#')).unwrap_or(rest.len());
        uri.path = rest[..end].to_string();
        rest = &rest[end..];
        if let Some(after) = rest.strip_prefix('?') {
            let end = after.find('#').unwrap_or(after.len());
            uri.query = Some(after[..end].to_string());
            rest = &after[end..];
        }
        if let Some(after) = rest.strip_prefix('#') {
            uri.fragment = Some(after.to_string());
        }
        Ok(uri)
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn is_absolute(&self) -> bool {
        self.scheme.is_some()
    }

    /// Host portion of the authority, without userinfo or port.
    pub fn host(&self) -> Option<&str> {
        let authority = self.authority.as_deref()?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        Some(match host.rsplit_once(':') {
            Some((h, port)) if port.bytes().all(|b| b.is_ascii_digit()) => h,
            _ => host,
        })
    }

    pub fn port(&self) -> Option<u16> {
        let authority = self.authority.as_deref()?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        host.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }

    /// Resolves a reference against this base (RFC 3986 section 5.2.2).
    pub fn resolve(&self, reference: &Uri) -> Uri {
        let mut target = Uri { fragment: reference.fragment.clone(), ..Uri::default() };
        if reference.scheme.is_some() {
            target.scheme = reference.scheme.clone();
            target.authority = reference.authority.clone();
            target.path = remove_dot_segments(&reference.path);
            target.query = reference.query.clone();
            return target;
        }
        if reference.authority.is_some() {
            target.authority = reference.authority.clone();
            target.path = remove_dot_segments(&reference.path);
            target.query = reference.query.clone();
        } else {
            if reference.path.is_empty() {
                target.path = self.path.clone();
                target.query = reference.query.clone().or_else(|| self.query.clone());
            } else {
                target.path = if reference.path.starts_with('/') {
                    remove_dot_segments(&reference.path)
                } else {
                    remove_dot_segments(&format!("{}{}", self.directory(), reference.path))
                };
                target.query = reference.query.clone();
            }
            target.authority = self.authority.clone();
        }
        target.scheme = self.scheme.clone();
        target
    }

    /// Shortest reference that resolves against this base back to `target`.
    pub fn unresolve(&self, target: &Uri) -> Uri {
        if target.scheme != self.scheme || target.authority != self.authority {
            return target.clone();
        }
        let mut relative = Uri { fragment: target.fragment.clone(), ..Uri::default() };
        if target.path == self.path && (target.query.is_some() || self.query.is_none()) {
            relative.query = target.query.clone();
            return relative;
        }
        let directory = self.directory();
        let suffix = target.path.strip_prefix(directory.as_str()).filter(|suffix| {
            let first = suffix.split('/').next().unwrap_or("");
            !suffix.is_empty() && !first.contains(':') && first != "." && first != ".." && !suffix.starts_with('/')
        });
        relative.path = match suffix {
            Some(suffix) => suffix.to_string(),
            None if target.path.starts_with('/') && !target.path.starts_with("//") => target.path.clone(),
            None => return target.clone(),
        };
        relative.query = target.query.clone();
        relative
    }

    /// Base path up to and including its last `/`.
    fn directory(&self) -> String {
        if self.authority.is_some() && self.path.is_empty() {
            return "/".to_string();
        }
        match self.path.rfind('/') {
            Some(i) => self.path[..=i].to_string(),
            None => String::new(),
        }
    }
}

fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    let absolute = path.starts_with('/');
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len().saturating_sub(1);
    let mut trailing = false;
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 && absolute {
            continue;
        }
        match *segment {
            "." => trailing = i == last,
            ".." => {
                output.pop();
                trailing = i == last;
            }
            s => {
                output.push(s);
                trailing = false;
            }
        }
    }
    let mut result = if absolute { String::from("/") } else { String::new() };
    result.push_str(&output.join("/"));
    if trailing && !result.ends_with('/') && !output.is_empty() {
        result.push('/');
    }
    result
}

impl fmt::Display for Uri {
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

impl FromStr for Uri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

/// Bounded two-way cache between the relative URIs written in envelopes and
/// the absolute URIs they denote under one base. Least recently used entries
/// are evicted first.
#[derive(Clone, Debug)]
pub struct UriCache {
    base: Uri,
    capacity: usize,
    resolved: IndexMap<String, Uri>,
    unresolved: IndexMap<Uri, String>,
}

impl UriCache {
    pub fn new(base: Uri, capacity: usize) -> Self {
        Self {
            base,
            capacity: capacity.max(1),
            resolved: IndexMap::new(),
            unresolved: IndexMap::new(),
        }
    }

    pub fn base(&self) -> &Uri {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn resolve(&mut self, input: &str) -> Result<Uri, UriError> {
        if let Some(index) = self.resolved.get_index_of(input) {
            let last = self.resolved.len() - 1;
            self.resolved.move_index(index, last);
            if let Some((_, uri)) = self.resolved.get_index(last) {
                return Ok(uri.clone());
            }
        }
        let uri = self.base.resolve(&Uri::parse(input)?);
        if self.resolved.len() >= self.capacity {
            if let Some((evicted, _)) = self.resolved.shift_remove_index(0) {
                trace!(uri = %evicted, "evicting resolved uri");
            }
        }
        self.resolved.insert(input.to_string(), uri.clone());
        Ok(uri)
    }

    pub fn unresolve(&mut self, uri: &Uri) -> String {
        if let Some(index) = self.unresolved.get_index_of(uri) {
            let last = self.unresolved.len() - 1;
            self.unresolved.move_index(index, last);
            if let Some((_, text)) = self.unresolved.get_index(last) {
                return text.clone();
            }
        }
        let text = self.base.unresolve(uri).to_string();
        if self.unresolved.len() >= self.capacity {
            self.unresolved.shift_remove_index(0);
        }
        self.unresolved.insert(uri.clone(), text.clone());
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let u = uri("warp://user@localhost:9001/unit/1?x=1#top");
        assert_eq!(u.scheme(), Some("warp"));
        assert_eq!(u.authority(), Some("user@localhost:9001"));
        assert_eq!(u.host(), Some("localhost"));
        assert_eq!(u.port(), Some(9001));
        assert_eq!(u.path(), "/unit/1");
        assert_eq!(u.query(), Some("x=1"));
        assert_eq!(u.fragment(), Some("top"));
        assert_eq!(u.to_string(), "warp://user@localhost:9001/unit/1?x=1#top");
    }

    #[test]
    fn test_parse_rejects_whitespace() {
        assert_eq!(Uri::parse("a b"), Err(UriError::InvalidChar { found: ' ', offset: 1 }));
        assert_eq!(Uri::parse(":x"), Err(UriError::EmptyScheme));
    }

    #[test]
    fn test_rfc3986_examples() {
        let base = uri("http://a/b/c/d;p?q");
        let cases = [
            ("g", "http://a/b/c/g"),
            ("./g", "http://a/b/c/g"),
            ("g/", "http://a/b/c/g/"),
            ("/g", "http://a/g"),
            ("//g", "http://g"),
            ("?y", "http://a/b/c/d;p?y"),
            ("g?y", "http://a/b/c/g?y"),
            ("#s", "http://a/b/c/d;p?q#s"),
            ("", "http://a/b/c/d;p?q"),
            (".", "http://a/b/c/"),
            ("..", "http://a/b/"),
            ("../g", "http://a/b/g"),
            ("../..", "http://a/"),
            ("../../../g", "http://a/g"),
            ("g;x=1/../y", "http://a/b/c/y"),
        ];
        for (reference, expected) in cases {
            assert_eq!(base.resolve(&uri(reference)).to_string(), expected, "{}", reference);
        }
    }

    #[test]
    fn test_unresolve_prefers_relative() {
        let base = uri("warp://localhost:9001/");
        assert_eq!(base.unresolve(&uri("warp://localhost:9001/unit/1")).to_string(), "unit/1");
        assert_eq!(base.unresolve(&uri("warp://other/unit/1")).to_string(), "warp://other/unit/1");
        let base = uri("warp://h/a/b");
        assert_eq!(base.unresolve(&uri("warp://h/c")).to_string(), "/c");
    }

    #[test]
    fn test_cache_round_trip_and_eviction() {
        let mut cache = UriCache::new(uri("warp://localhost/"), 2);
        let a = cache.resolve("/unit/a").unwrap();
        assert_eq!(a.to_string(), "warp://localhost/unit/a");
        assert_eq!(cache.unresolve(&a), "unit/a");
        cache.resolve("/unit/b").unwrap();
        cache.resolve("/unit/a").unwrap();
        cache.resolve("/unit/c").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resolve("/unit/b").unwrap().to_string(), "warp://localhost/unit/b");
    }

    fn segment() -> impl Strategy<Value = String> {
        prop_oneof!["[a-z]{1,3}", Just("..".to_string()), Just(".".to_string())]
    }

    fn reference() -> impl Strategy<Value = String> {
        (
            prop::bool::ANY,
            prop::collection::vec(segment(), 0..4),
            prop::option::of("[a-z]{1,2}"),
            prop::option::of("[a-z]{1,2}"),
        )
            .prop_map(|(absolute, segments, query, fragment)| {
                let mut s = if absolute { "/".to_string() } else { String::new() };
                s.push_str(&segments.join("/"));
                if let Some(q) = query {
                    s.push('?');
                    s.push_str(&q);
                }
                if let Some(f) = fragment {
                    s.push('#');
                    s.push_str(&f);
                }
                s
            })
    }

    proptest! {
        #[test]
        fn test_unresolve_then_resolve_is_identity(
            base in reference(),
            target in reference(),
        ) {
            let base = uri("warp://host").resolve(&uri(&base));
            let target = base.resolve(&uri(&target));
            let relative = base.unresolve(&target);
            prop_assert_eq!(base.resolve(&relative), target);
        }

        #[test]
        fn test_cache_agrees_with_base(target in reference()) {
            let base = uri("warp://host/dir/");
            let mut cache = UriCache::new(base.clone(), 4);
            let resolved = cache.resolve(&target).unwrap();
            let text = cache.unresolve(&resolved);
            prop_assert_eq!(cache.resolve(&text).unwrap(), resolved);
        }
    }
}
