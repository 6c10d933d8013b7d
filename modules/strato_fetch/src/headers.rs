// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::rc::Rc;

use hyper::HeaderMap;
use strato_exceptions::{WebError, WebResult};

const HEADERS_KEY_COOKIE: &str = "cookie";
const HEADERS_KEY_SET_COOKIE: &str = "set-cookie";

type ImmutableString = Rc<str>;

// https://fetch.spec.whatwg.org/#concept-headers-guard
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum HeadersGuard {
    #[default]
    None,
    Request,
    RequestNoCors,
    Response,
    Immutable,
}

/// Spec-shaped header list: lowercase names, combined values, multi-entry
/// set-cookie, guard-filtered mutation.
#[derive(Clone, Default, Debug)]
pub struct Headers {
    headers: Vec<(ImmutableString, ImmutableString)>,
    guard: HeadersGuard,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guard(guard: HeadersGuard) -> Self {
        Self {
            headers: Vec::new(),
            guard,
        }
    }

    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
        guard: HeadersGuard,
    ) -> WebResult<Self> {
        let mut headers = Self::with_guard(HeadersGuard::None);
        for (key, value) in pairs {
            headers.append(key, value)?;
        }
        headers.guard = guard;
        Ok(headers)
    }

    pub fn from_http_headers(header_map: &HeaderMap, guard: HeadersGuard) -> Self {
        let mut headers = Vec::new();
        for (name, value) in header_map.iter() {
            headers.push((
                name.as_str().into(),
                String::from_utf8_lossy(value.as_bytes()).as_ref().into(),
            ));
        }
        Self { headers, guard }
    }

    fn check_guard(&self) -> WebResult<()> {
        if self.guard == HeadersGuard::Immutable {
            return Err(WebError::type_error("Headers are immutable"));
        }
        Ok(())
    }

    pub fn append(&mut self, key: &str, value: &str) -> WebResult<()> {
        self.check_guard()?;
        let key: ImmutableString = key.to_lowercase().into();
        if !is_http_header_name(&key) {
            return Err(WebError::type_error("Invalid key"));
        }

        let mut value = normalize_header_value(value);
        if self.guard == HeadersGuard::RequestNoCors {
            let first = value.split(',').next().unwrap_or("").trim();
            if !is_cors_safelisted_request_header(&key, first) {
                return Ok(()); // silently ignore disallowed header
            }
            if self.headers.iter().any(|(k, _)| k == &key) {
                return Ok(()); // silently ignore same header
            }
            value = first.into();
        }
        if !is_http_header_value(&value) {
            return Err(WebError::type_error("Invalid value of key"));
        }

        let str_key = key.as_ref();
        if str_key == HEADERS_KEY_SET_COOKIE {
            self.headers.push((key, value.into()));
            return Ok(());
        }
        if let Some((_, existing_value)) = self.headers.iter_mut().find(|(k, _)| k == &key) {
            let mut new_value = String::with_capacity(existing_value.len() + 2 + value.len());
            new_value.push_str(existing_value);
            match str_key {
                HEADERS_KEY_COOKIE => new_value.push_str("; "),
                _ => new_value.push_str(", "),
            }
            new_value.push_str(&value);
            *existing_value = new_value.into();
        } else {
            self.headers.push((key, value.into()));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();

        if key == HEADERS_KEY_SET_COOKIE {
            let result: Vec<&str> = self
                .headers
                .iter()
                .filter_map(|(k, v)| (k.as_ref() == key).then_some(v.as_ref()))
                .collect();
            return if result.is_empty() {
                None
            } else {
                Some(result.join(", "))
            };
        }
        self.headers
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.to_string())
    }

    pub fn get_set_cookie(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter_map(|(k, v)| (k.as_ref() == HEADERS_KEY_SET_COOKIE).then_some(v.as_ref()))
            .collect()
    }

    pub fn has(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.headers.iter().any(|(k, _)| k.as_ref() == key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> WebResult<()> {
        self.check_guard()?;
        let key: ImmutableString = key.to_lowercase().into();
        if !is_http_header_name(&key) {
            return Err(WebError::type_error("Invalid key"));
        }

        let mut value = normalize_header_value(value);
        if self.guard == HeadersGuard::RequestNoCors {
            let first = value.split(',').next().unwrap_or("").trim();
            if !is_cors_safelisted_request_header(&key, first) {
                return Ok(()); // silently ignore disallowed header
            }
            value = first.into();
        }
        if !is_http_header_value(&value) {
            return Err(WebError::type_error("Invalid value of key"));
        }

        if key.as_ref() == HEADERS_KEY_SET_COOKIE {
            self.headers.retain(|(k, _)| k != &key);
            self.headers.push((key, value.into()));
        } else {
            match self.headers.iter_mut().find(|(k, _)| k == &key) {
                Some((_, existing_value)) => *existing_value = value.into(),
                None => self.headers.push((key, value.into())),
            }
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> WebResult<()> {
        self.check_guard()?;
        let key = key.to_lowercase();
        if !is_http_header_name(&key) {
            return Err(WebError::type_error("Invalid key"));
        }

        self.headers.retain(|(k, _)| k.as_ref() != key);
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.headers.iter().map(|(k, _)| k.as_ref()).collect()
    }

    pub fn values(&self) -> Vec<&str> {
        self.headers.iter().map(|(_, v)| v.as_ref()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub(crate) fn guard(&self) -> HeadersGuard {
        self.guard
    }

    pub(crate) fn set_guard(&mut self, guard: HeadersGuard) {
        self.guard = guard;
    }
}

// 3.2.6. Field Value Components
// https://datatracker.ietf.org/doc/html/rfc7230#section-3.2.6
fn is_http_header_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    name.bytes().all(|b| {
        matches!(b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' |
            b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' |
            b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
        )
    })
}

fn is_http_header_value(value: &str) -> bool {
    value.chars().all(|c| {
        c == '\t'                // HTAB
        || c == ' '              // SP
        || ('\u{21}'..='\u{7E}').contains(&c) // VCHAR range
        || c == '\u{0C}'         // Form Feed
        || c == '\u{00A0}' // NBSP
    })
}

/// Strips leading/trailing HTTP whitespace, folds obs-fold continuations
/// and drops bare CR/LF.
fn normalize_header_value(text: &str) -> String {
    let input = text.as_bytes();
    let mut output: Vec<u8> = Vec::with_capacity(input.len());
    let mut read_idx = 0;

    // Skip leading SP or HTAB
    while read_idx < input.len() && (input[read_idx] == b' ' || input[read_idx] == b'\t') {
        read_idx += 1;
    }

    let mut pending_whitespace: Option<u8> = None;
    while read_idx < input.len() {
        match input[read_idx] {
            // obs-fold: CRLF followed by SP or HTAB
            b'\r'
                if read_idx + 2 < input.len()
                    && input[read_idx + 1] == b'\n'
                    && (input[read_idx + 2] == b' ' || input[read_idx + 2] == b'\t') =>
            {
                pending_whitespace = Some(input[read_idx + 2]);
                read_idx += 3;
            },
            b'\r' | b'\n' => {
                read_idx += 1;
            },
            b' ' | b'\t' => {
                pending_whitespace = Some(input[read_idx]);
                read_idx += 1;
            },
            byte => {
                if let Some(ws) = pending_whitespace.take() {
                    if !output.is_empty() {
                        output.push(ws);
                    }
                }
                output.push(byte);
                read_idx += 1;
            },
        }
    }

    String::from_utf8(output).expect("normalization only removes whole ASCII bytes")
}

// https://fetch.spec.whatwg.org/#cors-safelisted-request-header
pub(crate) fn is_cors_safelisted_request_header(key: &str, value: &str) -> bool {
    if value.len() > 128 {
        return false;
    }

    match key.to_ascii_lowercase().as_str() {
        "accept" => !contains_cors_unsafe_request_header_byte(value),
        "accept-language" | "content-language" => is_cors_safelisted_field_value(value),
        "content-type" => {
            if contains_cors_unsafe_request_header_byte(value) {
                return false;
            }
            let mime_type = value.split(';').next().unwrap_or("").trim();
            matches!(
                mime_type.to_ascii_lowercase().as_str(),
                "application/x-www-form-urlencoded" | "multipart/form-data" | "text/plain" | ""
            )
        },
        _ => false,
    }
}

// https://fetch.spec.whatwg.org/#cors-unsafe-request-header-byte
fn contains_cors_unsafe_request_header_byte(value: &str) -> bool {
    value.bytes().any(|byte| {
        matches!(byte,
            // control characters except HT
            0x00..=0x08 | 0x0A..=0x1F |
            0x22 | 0x28 | 0x29 | 0x3A | 0x3C | 0x3E | 0x3F | 0x40 |
            0x5B | 0x5C | 0x5D | 0x7B | 0x7D | 0x7F
        )
    })
}

fn is_cors_safelisted_field_value(value: &str) -> bool {
    value.bytes().all(|b| match b {
        0x30..=0x39 | // 0-9
        0x41..=0x5A | // A-Z
        0x61..=0x7A | // a-z
        0x20 | 0x2A | 0x2C | 0x2D | 0x2E | 0x3B | 0x3D => true,
        _ => false,
    })
}
