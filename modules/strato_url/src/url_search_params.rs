// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use url::form_urlencoded;

/// `application/x-www-form-urlencoded` pair list.
///
/// <https://developer.mozilla.org/en-US/docs/Web/API/URLSearchParams>
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct UrlSearchParams {
    pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a query string; a single leading `?` is ignored.
    pub fn parse(init: &str) -> Self {
        let init = init.strip_prefix('?').unwrap_or(init);
        Self {
            pairs: form_urlencoded::parse(init.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    pub fn delete(&mut self, name: &str) {
        self.pairs.retain(|(k, _)| k != name);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == name)
    }

    /// Replaces the first match and drops the rest, or appends.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut replaced = false;
        self.pairs.retain_mut(|(k, v)| {
            if *k == name {
                if replaced {
                    return false;
                }
                *v = value.clone();
                replaced = true;
            }
            true
        });
        if !replaced {
            self.pairs.push((name, value));
        }
    }

    /// Stable sort by name, preserving relative value order.
    pub fn sort(&mut self) {
        self.pairs.sort_by(|a, b| a.0.cmp(&b.0));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical serialized form, without a leading `?`.
    pub fn serialize(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.pairs {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }
}

impl std::fmt::Display for UrlSearchParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl From<&str> for UrlSearchParams {
    fn from(init: &str) -> Self {
        Self::parse(init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_form() {
        let params = UrlSearchParams::parse("a=1&b=two&a=3");
        assert_eq!(params.serialize(), "a=1&b=two&a=3");
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get_all("a"), ["1", "3"]);
    }

    #[test]
    fn set_collapses_duplicates() {
        let mut params = UrlSearchParams::parse("a=1&b=2&a=3");
        params.set("a", "9");
        assert_eq!(params.serialize(), "a=9&b=2");
    }

    #[test]
    fn delete_then_has_is_false() {
        let mut params = UrlSearchParams::parse("a=1&b=2");
        params.delete("a");
        assert!(!params.has("a"));
        assert!(params.has("b"));
    }

    #[test]
    fn values_are_percent_encoded() {
        let mut params = UrlSearchParams::new();
        params.append("q", "a b&c");
        assert_eq!(params.serialize(), "q=a+b%26c");
        let parsed = UrlSearchParams::parse(&params.serialize());
        assert_eq!(parsed.get("q"), Some("a b&c"));
    }

    #[test]
    fn sort_is_stable() {
        let mut params = UrlSearchParams::parse("b=1&a=x&b=2&a=y");
        params.sort();
        assert_eq!(params.serialize(), "a=x&a=y&b=1&b=2");
    }
}
