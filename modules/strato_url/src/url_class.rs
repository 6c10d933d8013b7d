// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::fmt;

use strato_exceptions::{WebError, WebResult};

/// WHATWG URL surface over the `url` crate parser.
///
/// <https://developer.mozilla.org/en-US/docs/Web/API/URL>
#[derive(Clone, PartialEq, Eq)]
pub struct Url {
    url: url::Url,
}

impl Url {
    pub fn parse(input: &str) -> WebResult<Self> {
        let url = url::Url::parse(input)
            .map_err(|_| WebError::type_error(format!("Invalid URL: {}", input)))?;
        Ok(Self { url })
    }

    pub fn parse_with_base(input: &str, base: &str) -> WebResult<Self> {
        let base = url::Url::parse(base)
            .map_err(|_| WebError::type_error(format!("Invalid base URL: {}", base)))?;
        let url = base
            .join(input)
            .map_err(|_| WebError::type_error(format!("Invalid URL: {}", input)))?;
        Ok(Self { url })
    }

    pub fn can_parse(input: &str) -> bool {
        url::Url::parse(input).is_ok()
    }

    pub fn href(&self) -> &str {
        self.url.as_str()
    }

    /// Scheme with the trailing colon, e.g. `https:`.
    pub fn protocol(&self) -> String {
        [self.url.scheme(), ":"].concat()
    }

    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// host:port, or just host when the port is the scheme default.
    pub fn host(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.hostname(), port),
            None => self.hostname().into(),
        }
    }

    pub fn pathname(&self) -> &str {
        self.url.path()
    }

    /// Query with the leading `?`, or the empty string.
    pub fn search(&self) -> String {
        match self.url.query() {
            Some(query) if !query.is_empty() => ["?", query].concat(),
            _ => String::new(),
        }
    }

    pub fn hash(&self) -> String {
        match self.url.fragment() {
            Some(fragment) if !fragment.is_empty() => ["#", fragment].concat(),
            _ => String::new(),
        }
    }

    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    pub fn set_search(&mut self, query: Option<&str>) {
        self.url.set_query(query);
    }

    pub fn as_inner(&self) -> &url::Url {
        &self.url
    }

    pub fn into_inner(self) -> url::Url {
        self.url
    }
}

impl From<url::Url> for Url {
    fn from(url: url::Url) -> Self {
        Self { url }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.href())
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Url").field(&self.href()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components() {
        let url = Url::parse("https://example.com:8080/a/b?x=1#frag").unwrap();
        assert_eq!(url.protocol(), "https:");
        assert_eq!(url.hostname(), "example.com");
        assert_eq!(url.host(), "example.com:8080");
        assert_eq!(url.pathname(), "/a/b");
        assert_eq!(url.search(), "?x=1");
        assert_eq!(url.hash(), "#frag");
    }

    #[test]
    fn default_port_is_elided() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.port(), None);
        assert_eq!(url.search(), "");
    }

    #[test]
    fn invalid_input_is_a_type_error() {
        let err = Url::parse("not a url").unwrap_err();
        assert!(matches!(err, WebError::Type(_)));
        assert!(!Url::can_parse("not a url"));
        assert!(Url::can_parse("http://x/"));
    }

    #[test]
    fn relative_against_base() {
        let url = Url::parse_with_base("/docs", "https://example.com/old").unwrap();
        assert_eq!(url.href(), "https://example.com/docs");
    }
}
