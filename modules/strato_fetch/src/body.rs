// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::cell::RefCell;

use bytes::Bytes;
use strato_encoding::TextEncoder;
use strato_exceptions::{WebError, WebResult};
use strato_stream_web::ByteStream;
use strato_url::UrlSearchParams;
use strato_utils::bytes::strip_bom;

use crate::body_stream::bytes_stream;

/// Everything a Request or Response accepts as a body.
pub enum BodyInit {
    Text(String),
    Bytes(Vec<u8>),
    SearchParams(UrlSearchParams),
    Stream(ByteStream),
}

/// https://fetch.spec.whatwg.org/#concept-bodyinit-extract
///
/// `source` stays populated for materialized sequences, which keeps
/// retries and content-length cheap; a raw stream has no source.
pub struct ExtractedBody {
    pub stream: ByteStream,
    pub source: Option<Bytes>,
    pub length: Option<usize>,
    pub content_type: Option<&'static str>,
}

pub(crate) fn extract_body(init: BodyInit, keepalive: bool) -> WebResult<ExtractedBody> {
    let (source, content_type) = match init {
        BodyInit::Stream(stream) => {
            // If keepalive is true, then throw a TypeError.
            if keepalive {
                return Err(WebError::type_error(
                    "Cannot use a ReadableStream body with keepalive",
                ));
            }
            // If object is disturbed or locked, then throw a TypeError.
            if stream.is_disturbed() || stream.locked() {
                return Err(WebError::type_error(
                    "The body stream is disturbed or locked",
                ));
            }
            return Ok(ExtractedBody {
                stream,
                source: None,
                length: None,
                content_type: None,
            });
        },
        BodyInit::Text(text) => (
            Bytes::from(TextEncoder::new().encode(&text)),
            Some("text/plain;charset=UTF-8"),
        ),
        BodyInit::Bytes(bytes) => (Bytes::from(bytes), Some("application/octet-stream")),
        BodyInit::SearchParams(params) => (
            Bytes::from(TextEncoder::new().encode(&params.serialize())),
            Some("application/x-www-form-urlencoded;charset=UTF-8"),
        ),
    };

    let length = source.len();
    Ok(ExtractedBody {
        stream: bytes_stream(source.clone()),
        source: Some(source),
        length: Some(length),
        content_type,
    })
}

#[derive(Debug)]
enum BodyVariant {
    None,
    /// Materialized and not yet exposed as a stream.
    Source { source: Bytes, streamed: Option<ByteStream> },
    Stream(ByteStream),
    Used,
}

/// The body mix-in shared by Request and Response: lazy `body()` stream,
/// one-shot consumption, content-type bookkeeping.
#[derive(Debug)]
pub struct Body {
    variant: RefCell<BodyVariant>,
    content_type: RefCell<Option<String>>,
    length: Option<usize>,
}

impl Body {
    pub fn none() -> Self {
        Self {
            variant: RefCell::new(BodyVariant::None),
            content_type: RefCell::new(None),
            length: None,
        }
    }

    pub fn from_init(init: BodyInit, keepalive: bool) -> WebResult<Self> {
        let extracted = extract_body(init, keepalive)?;
        Ok(Self::from_extracted(extracted))
    }

    pub fn from_extracted(extracted: ExtractedBody) -> Self {
        let variant = match extracted.source {
            Some(source) => BodyVariant::Source {
                source,
                streamed: Some(extracted.stream),
            },
            None => BodyVariant::Stream(extracted.stream),
        };
        Self {
            variant: RefCell::new(variant),
            content_type: RefCell::new(extracted.content_type.map(str::to_string)),
            length: extracted.length,
        }
    }

    pub fn from_stream(stream: ByteStream, content_type: Option<String>) -> Self {
        Self {
            variant: RefCell::new(BodyVariant::Stream(stream)),
            content_type: RefCell::new(content_type),
            length: None,
        }
    }

    pub fn from_bytes(bytes: Bytes, content_type: Option<String>) -> Self {
        let length = bytes.len();
        Self {
            variant: RefCell::new(BodyVariant::Source {
                source: bytes,
                streamed: None,
            }),
            content_type: RefCell::new(content_type),
            length: Some(length),
        }
    }

    pub fn has_body(&self) -> bool {
        !matches!(&*self.variant.borrow(), BodyVariant::None)
    }

    pub fn content_type(&self) -> Option<String> {
        self.content_type.borrow().clone()
    }

    pub(crate) fn set_content_type(&self, content_type: Option<String>) {
        *self.content_type.borrow_mut() = content_type;
    }

    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// `bodyUsed` — true once any read has touched the body.
    pub fn body_used(&self) -> bool {
        match &*self.variant.borrow() {
            BodyVariant::None => false,
            BodyVariant::Used => true,
            BodyVariant::Source { streamed, .. } => streamed
                .as_ref()
                .map(ByteStream::is_disturbed)
                .unwrap_or(false),
            BodyVariant::Stream(stream) => stream.is_disturbed(),
        }
    }

    /// `body` — the content as a one-shot stream, converting a
    /// materialized source on first access.
    pub fn body(&self) -> Option<ByteStream> {
        let mut variant = self.variant.borrow_mut();
        match &mut *variant {
            BodyVariant::None | BodyVariant::Used => None,
            BodyVariant::Stream(stream) => Some(stream.clone()),
            BodyVariant::Source { source, streamed } => {
                let stream = streamed
                    .get_or_insert_with(|| bytes_stream(source.clone()))
                    .clone();
                Some(stream)
            },
        }
    }

    /// The materialized source, when one exists and is still unread.
    pub(crate) fn source(&self) -> Option<Bytes> {
        match &*self.variant.borrow() {
            BodyVariant::Source { source, .. } => Some(source.clone()),
            _ => None,
        }
    }

    /// Hands the wire representation to the network layer: the cheap
    /// source when available, otherwise the stream itself.
    pub(crate) fn take_wire_body(&self) -> WireBody {
        let mut variant = self.variant.borrow_mut();
        match std::mem::replace(&mut *variant, BodyVariant::Used) {
            BodyVariant::None => {
                *variant = BodyVariant::None;
                WireBody::None
            },
            BodyVariant::Used => WireBody::Used,
            BodyVariant::Source { source, .. } => WireBody::Bytes(source),
            BodyVariant::Stream(stream) => WireBody::Stream(stream),
        }
    }

    /// The single consume path: reads the stream to completion, then the
    /// per-method decoding happens on the collected bytes.
    async fn consume(&self) -> WebResult<Vec<u8>> {
        enum Consume {
            Empty,
            AlreadyUsed,
            Unusable,
            FromSource(Vec<u8>),
            // An exposed stream IS the body; reading through it keeps its
            // disturbed state truthful.
            FromStream(ByteStream),
        }

        let action = {
            let variant = self.variant.borrow();
            match &*variant {
                BodyVariant::None => Consume::Empty,
                BodyVariant::Used => Consume::AlreadyUsed,
                BodyVariant::Source { source, streamed } => match streamed {
                    Some(stream) if stream.is_disturbed() || stream.locked() => Consume::Unusable,
                    Some(stream) => Consume::FromStream(stream.clone()),
                    None => Consume::FromSource(source.to_vec()),
                },
                BodyVariant::Stream(stream) => {
                    if stream.is_disturbed() || stream.locked() {
                        Consume::Unusable
                    } else {
                        Consume::FromStream(stream.clone())
                    }
                },
            }
        };

        let stream = match action {
            Consume::Empty => return Ok(Vec::new()),
            Consume::AlreadyUsed => {
                return Err(WebError::type_error("Body is unusable: already read"))
            },
            Consume::Unusable => {
                return Err(WebError::type_error(
                    "Body is unusable: its stream is disturbed or locked",
                ))
            },
            Consume::FromSource(bytes) => {
                *self.variant.borrow_mut() = BodyVariant::Used;
                return Ok(bytes);
            },
            Consume::FromStream(stream) => {
                *self.variant.borrow_mut() = BodyVariant::Used;
                stream
            },
        };

        // Fully read the stream, concatenating the chunks.
        let reader = stream.get_reader()?;
        let mut collected = Vec::new();
        loop {
            match reader.read().await? {
                Some(view) => collected.extend_from_slice(view.as_slice()),
                None => return Ok(collected),
            }
        }
    }

    pub async fn bytes(&self) -> WebResult<Vec<u8>> {
        self.consume().await
    }

    pub async fn array_buffer(&self) -> WebResult<Vec<u8>> {
        self.consume().await
    }

    pub async fn text(&self) -> WebResult<String> {
        let bytes = self.consume().await?;
        Ok(String::from_utf8_lossy(&strip_bom(bytes)).into_owned())
    }

    pub async fn json(&self) -> WebResult<serde_json::Value> {
        let bytes = self.consume().await?;
        serde_json::from_slice(&strip_bom(bytes))
            .map_err(|e| WebError::syntax_error(format!("Unexpected token in JSON: {}", e)))
    }
}

/// What actually goes on the wire for a request or response body.
pub(crate) enum WireBody {
    None,
    Used,
    Bytes(Bytes),
    Stream(ByteStream),
}

#[cfg(test)]
mod tests {
    use strato_test::test_local;

    use super::*;

    #[tokio::test]
    async fn text_body_sets_type_and_round_trips() {
        test_local(async {
            let body = Body::from_init(BodyInit::Text("hällo".into()), false).unwrap();
            assert_eq!(
                body.content_type().as_deref(),
                Some("text/plain;charset=UTF-8")
            );
            assert!(!body.body_used());
            assert_eq!(body.text().await.unwrap(), "hällo");
            assert!(body.body_used());
        })
        .await;
    }

    #[tokio::test]
    async fn reconsuming_is_a_type_error() {
        test_local(async {
            let body = Body::from_init(BodyInit::Text("x".into()), false).unwrap();
            body.bytes().await.unwrap();
            assert!(matches!(body.text().await, Err(WebError::Type(_))));
        })
        .await;
    }

    #[tokio::test]
    async fn invalid_json_is_a_syntax_error() {
        test_local(async {
            let body = Body::from_init(BodyInit::Text("{not json".into()), false).unwrap();
            assert!(matches!(body.json().await, Err(WebError::Syntax(_))));
        })
        .await;
    }

    #[tokio::test]
    async fn json_parses_objects() {
        test_local(async {
            let body =
                Body::from_init(BodyInit::Text(r#"{"a":[1,2],"b":"c"}"#.into()), false).unwrap();
            let value = body.json().await.unwrap();
            assert_eq!(value["a"][1], 2);
            assert_eq!(value["b"], "c");
        })
        .await;
    }

    #[tokio::test]
    async fn search_params_body_serializes_canonically() {
        test_local(async {
            let params = UrlSearchParams::from_pairs([("a", "1")]);
            let body = Body::from_init(BodyInit::SearchParams(params), false).unwrap();
            assert_eq!(
                body.content_type().as_deref(),
                Some("application/x-www-form-urlencoded;charset=UTF-8")
            );
            assert_eq!(body.text().await.unwrap(), "a=1");
        })
        .await;
    }

    #[tokio::test]
    async fn stream_body_has_no_source_and_consumes_once() {
        test_local(async {
            let stream = crate::body_stream::bytes_stream(Bytes::from_static(b"streamed"));
            let body = Body::from_init(BodyInit::Stream(stream), false).unwrap();
            assert!(body.source().is_none());
            assert_eq!(body.length(), None);
            assert_eq!(body.bytes().await.unwrap(), b"streamed");
            assert!(matches!(body.bytes().await, Err(WebError::Type(_))));
        })
        .await;
    }

    #[tokio::test]
    async fn keepalive_rejects_stream_bodies() {
        test_local(async {
            let stream = crate::body_stream::bytes_stream(Bytes::new());
            let err = Body::from_init(BodyInit::Stream(stream), true).unwrap_err();
            assert!(matches!(err, WebError::Type(_)));
        })
        .await;
    }

    #[tokio::test]
    async fn locked_stream_bodies_are_unusable() {
        test_local(async {
            let stream = crate::body_stream::bytes_stream(Bytes::from_static(b"x"));
            let _reader = stream.get_reader().unwrap();
            let err = Body::from_init(BodyInit::Stream(stream), false).unwrap_err();
            assert!(matches!(err, WebError::Type(_)));
        })
        .await;
    }

    #[tokio::test]
    async fn body_accessor_converts_source_to_one_shot_stream() {
        test_local(async {
            let body = Body::from_init(BodyInit::Text("chunked".into()), false).unwrap();
            let stream = body.body().unwrap();
            let reader = stream.get_reader().unwrap();
            assert_eq!(
                reader.read().await.unwrap().unwrap().as_slice(),
                b"chunked"
            );
            assert!(reader.read().await.unwrap().is_none());
            // reading the exposed stream marks the body used
            assert!(body.body_used());
        })
        .await;
    }
}
