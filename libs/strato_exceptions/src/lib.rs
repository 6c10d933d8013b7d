// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// https://webidl.spec.whatwg.org/#idl-DOMException-error-names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DOMExceptionName {
    AbortError,
    TimeoutError,
    InvalidStateError,
    NotSupportedError,
}

impl DOMExceptionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DOMExceptionName::AbortError => "AbortError",
            DOMExceptionName::TimeoutError => "TimeoutError",
            DOMExceptionName::InvalidStateError => "InvalidStateError",
            DOMExceptionName::NotSupportedError => "NotSupportedError",
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            DOMExceptionName::AbortError => "The operation was aborted",
            DOMExceptionName::TimeoutError => "The operation timed out",
            DOMExceptionName::InvalidStateError => "The object is in an invalid state",
            DOMExceptionName::NotSupportedError => "The operation is not supported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DOMException {
    name: DOMExceptionName,
    message: String,
}

impl DOMException {
    pub fn new(name: DOMExceptionName, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            name.default_message().into()
        } else {
            message
        };
        Self { name, message }
    }

    pub fn with_name(name: DOMExceptionName) -> Self {
        Self::new(name, String::new())
    }

    pub fn name(&self) -> &'static str {
        self.name.as_str()
    }

    pub fn kind(&self) -> DOMExceptionName {
        self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DOMException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

impl std::error::Error for DOMException {}

/// The error value flowing through streams, fetch and serve.
///
/// Doubles as the cancel/abort *reason*: what the original passes around as
/// an exception value travels here as a cloneable enum.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WebError {
    #[error("TypeError: {0}")]
    Type(Cow<'static, str>),
    #[error("RangeError: {0}")]
    Range(Cow<'static, str>),
    #[error("SyntaxError: {0}")]
    Syntax(Cow<'static, str>),
    #[error(transparent)]
    Dom(#[from] DOMException),
    /// A host op failure, surfaced unchanged to the awaiting caller.
    #[error("{0}")]
    Op(String),
}

impl WebError {
    pub fn type_error(message: impl Into<Cow<'static, str>>) -> Self {
        WebError::Type(message.into())
    }

    pub fn range_error(message: impl Into<Cow<'static, str>>) -> Self {
        WebError::Range(message.into())
    }

    pub fn syntax_error(message: impl Into<Cow<'static, str>>) -> Self {
        WebError::Syntax(message.into())
    }

    pub fn op_error(error: impl fmt::Display) -> Self {
        WebError::Op(error.to_string())
    }

    pub fn abort_error() -> Self {
        WebError::Dom(DOMException::with_name(DOMExceptionName::AbortError))
    }

    pub fn timeout_error() -> Self {
        WebError::Dom(DOMException::with_name(DOMExceptionName::TimeoutError))
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, WebError::Dom(e) if e.kind() == DOMExceptionName::AbortError)
    }
}

pub type WebResult<T> = Result<T, WebError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_exception_defaults_message() {
        let e = DOMException::with_name(DOMExceptionName::AbortError);
        assert_eq!(e.name(), "AbortError");
        assert_eq!(e.message(), "The operation was aborted");
        assert_eq!(e.to_string(), "AbortError: The operation was aborted");
    }

    #[test]
    fn abort_reason_is_recognized() {
        assert!(WebError::abort_error().is_abort());
        assert!(!WebError::timeout_error().is_abort());
        assert!(!WebError::type_error("nope").is_abort());
    }

    #[test]
    fn kinds_render_like_their_js_counterparts() {
        assert_eq!(WebError::type_error("x").to_string(), "TypeError: x");
        assert_eq!(WebError::range_error("y").to_string(), "RangeError: y");
        assert_eq!(WebError::syntax_error("z").to_string(), "SyntaxError: z");
    }
}
