// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use strato_exceptions::{WebError, WebResult};
use strato_stream_web::{bridge, ByteStream};
use strato_url::Url;
use strato_utils::channel::BufferChannel;
use tracing::trace;

use crate::body::{Body, BodyInit, WireBody};
use crate::headers::{Headers, HeadersGuard};

/// The wire-side body type shared by the client and server paths.
pub type HttpBody = UnsyncBoxBody<Bytes, std::io::Error>;

// https://fetch.spec.whatwg.org/#concept-response-type
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum ResponseType {
    Basic,
    Cors,
    #[default]
    Default,
    Error,
    Opaque,
    OpaqueRedirect,
}

pub struct ResponseInit {
    pub status: u16,
    pub status_text: String,
    pub headers: Option<Headers>,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: String::new(),
            headers: None,
        }
    }
}

// https://fetch.spec.whatwg.org/#null-body-status
fn is_null_body_status(status: u16) -> bool {
    matches!(status, 101 | 103 | 204 | 205 | 304)
}

fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// The inner response record plus its public accessors.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Rc<RefCell<Headers>>,
    body: Body,
    response_type: ResponseType,
    url_list: Vec<Url>,
    redirected: bool,
}

impl Response {
    /// new Response(body, init).
    pub fn new(body: Option<BodyInit>, init: ResponseInit) -> WebResult<Self> {
        // If init["status"] is not in the range 200 to 599, inclusive, then
        // throw a RangeError.
        if !(200..=599).contains(&init.status) {
            return Err(WebError::range_error("Invalid response status code"));
        }

        let mut headers = init.headers.unwrap_or_default();
        headers.set_guard(HeadersGuard::Response);

        let body = match body {
            Some(body) => {
                // If init["status"] is a null body status, then throw a
                // TypeError.
                if is_null_body_status(init.status) {
                    return Err(WebError::type_error(
                        "Response with null body status cannot have body",
                    ));
                }
                let body = Body::from_init(body, false)?;
                if let Some(content_type) = body.content_type() {
                    if !headers.has("content-type") {
                        headers.append("content-type", &content_type)?;
                    }
                }
                body
            },
            None => Body::none(),
        };

        Ok(Self {
            status: init.status,
            status_text: init.status_text,
            headers: Rc::new(RefCell::new(headers)),
            body,
            response_type: ResponseType::Default,
            url_list: Vec::new(),
            redirected: false,
        })
    }

    /// Response.error() — a network error: status 0, immutable headers.
    pub fn error() -> Self {
        let mut headers = Headers::default();
        headers.set_guard(HeadersGuard::Immutable);
        Self {
            status: 0,
            status_text: String::new(),
            headers: Rc::new(RefCell::new(headers)),
            body: Body::none(),
            response_type: ResponseType::Error,
            url_list: Vec::new(),
            redirected: false,
        }
    }

    /// Response.redirect(url, status).
    pub fn redirect(url: &str, status: u16) -> WebResult<Self> {
        let url = Url::parse(url)?;
        // If status is not a redirect status, then throw a RangeError.
        if !is_redirect_status(status) {
            return Err(WebError::range_error("Invalid redirect status code"));
        }
        let mut headers = Headers::default();
        headers.append("location", url.href())?;
        headers.set_guard(HeadersGuard::Immutable);
        Ok(Self {
            status,
            status_text: String::new(),
            headers: Rc::new(RefCell::new(headers)),
            body: Body::none(),
            response_type: ResponseType::Default,
            url_list: Vec::new(),
            redirected: false,
        })
    }

    /// Response.json(value, init). Named apart from the body mix-in's
    /// `json()` reader.
    pub fn from_json(value: &serde_json::Value, init: ResponseInit) -> WebResult<Self> {
        let text = serde_json::to_string(value)
            .map_err(|e| WebError::type_error(format!("Value is not JSON serializable: {}", e)))?;
        let mut response = Self::new(Some(BodyInit::Text(text)), init)?;
        response
            .headers
            .borrow_mut()
            .set("content-type", "application/json")?;
        response.body.set_content_type(Some("application/json".into()));
        Ok(response)
    }

    /// Assembles the response handed back by the network layer.
    pub(crate) fn from_network(
        status: u16,
        status_text: String,
        headers: Headers,
        body: Body,
        url_list: Vec<Url>,
        redirected: bool,
    ) -> Self {
        Self {
            status,
            status_text,
            headers: Rc::new(RefCell::new(headers)),
            body,
            response_type: ResponseType::Basic,
            url_list,
            redirected,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> Rc<RefCell<Headers>> {
        Rc::clone(&self.headers)
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn url(&self) -> Option<&Url> {
        self.url_list.last()
    }

    pub fn redirected(&self) -> bool {
        self.redirected
    }

    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    pub fn body(&self) -> Option<ByteStream> {
        self.body.body()
    }

    pub async fn bytes(&self) -> WebResult<Vec<u8>> {
        self.body.bytes().await
    }

    pub async fn array_buffer(&self) -> WebResult<Vec<u8>> {
        self.body.array_buffer().await
    }

    pub async fn text(&self) -> WebResult<String> {
        self.body.text().await
    }

    pub async fn json(&self) -> WebResult<serde_json::Value> {
        self.body.json().await
    }

    /// Serializes onto the wire. Streamed bodies are pumped through a
    /// byte-stream resource on the current task set.
    pub fn into_http_response(self) -> WebResult<hyper::Response<HttpBody>> {
        let mut builder = hyper::Response::builder().status(
            hyper::StatusCode::from_u16(self.status)
                .map_err(|_| WebError::range_error("Invalid response status code"))?,
        );

        let headers = self.headers.borrow();
        let mut has_content_length = false;
        for (key, value) in headers.iter() {
            if key == "content-length" {
                has_content_length = true;
            }
            builder = builder.header(key, value);
        }

        let body = match self.body.take_wire_body() {
            WireBody::None | WireBody::Used => Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            WireBody::Bytes(bytes) => {
                if !has_content_length {
                    let mut buffer = itoa::Buffer::new();
                    builder = builder.header("content-length", buffer.format(bytes.len()));
                }
                Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
            },
            WireBody::Stream(stream) => stream_wire_body(stream),
        };

        builder
            .body(body)
            .map_err(|e| WebError::Op(e.to_string()))
    }
}

/// Bridges a body stream into a wire body through a bounded resource.
pub(crate) fn stream_wire_body(stream: ByteStream) -> HttpBody {
    stream_wire_body_parts(stream).0
}

/// As above, also handing back the resource's read half so callers can
/// tear the pump down (abort paths).
pub(crate) fn stream_wire_body_parts(
    stream: ByteStream,
) -> (HttpBody, strato_utils::channel::BufferChannelReader<Bytes>) {
    let channel = BufferChannel::new(16);
    let reader = channel.reader();
    let writer = channel.writer();

    tokio::task::spawn_local(async move {
        if let Err(e) = bridge::pump_to_channel(stream, writer).await {
            trace!(error = %e, "body pump ended early");
        }
    });

    let frames = futures_util::stream::unfold(reader.clone(), |reader| async move {
        reader
            .read()
            .await
            .map(|bytes| (Ok::<_, std::io::Error>(hyper::body::Frame::data(bytes)), reader))
    });

    (StreamBody::new(frames).boxed_unsync(), reader)
}

#[cfg(test)]
mod tests {
    use strato_test::test_local;

    use super::*;

    #[tokio::test]
    async fn basic_response_round_trips() {
        test_local(async {
            let response = Response::new(
                Some(BodyInit::Text("ok".into())),
                ResponseInit {
                    status: 200,
                    ..Default::default()
                },
            )
            .unwrap();

            assert!(response.ok());
            assert_eq!(response.status(), 200);
            assert_eq!(
                response.headers().borrow().get("content-type").unwrap(),
                "text/plain;charset=UTF-8"
            );
            assert_eq!(response.text().await.unwrap(), "ok");
        })
        .await;
    }

    #[test]
    fn out_of_range_status_is_a_range_error() {
        for status in [0, 199, 600] {
            let err = Response::new(
                None,
                ResponseInit {
                    status,
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert!(matches!(err, WebError::Range(_)));
        }
    }

    #[test]
    fn null_body_status_rejects_bodies() {
        let err = Response::new(
            Some(BodyInit::Text("x".into())),
            ResponseInit {
                status: 204,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, WebError::Type(_)));
    }

    #[test]
    fn error_responses_have_type_error_and_status_zero() {
        let response = Response::error();
        assert_eq!(response.status(), 0);
        assert_eq!(response.response_type(), ResponseType::Error);
        assert!(!response.ok());
    }

    #[test]
    fn redirect_validates_status() {
        let response = Response::redirect("https://example.com/next", 302).unwrap();
        assert_eq!(response.status(), 302);
        assert_eq!(
            response.headers().borrow().get("location").unwrap(),
            "https://example.com/next"
        );

        assert!(matches!(
            Response::redirect("https://example.com/next", 200),
            Err(WebError::Range(_))
        ));
    }

    #[tokio::test]
    async fn response_json_sets_content_type() {
        test_local(async {
            let value = serde_json::json!({"hello": "world"});
            let response = Response::from_json(&value, ResponseInit::default()).unwrap();
            assert_eq!(
                response.headers().borrow().get("content-type").unwrap(),
                "application/json"
            );
            assert_eq!(response.json().await.unwrap(), value);
        })
        .await;
    }

    #[tokio::test]
    async fn wire_response_carries_headers_and_content_length() {
        test_local(async {
            let mut headers = Headers::new();
            headers.set("x-marker", "yes").unwrap();
            let response = Response::new(
                Some(BodyInit::Text("payload".into())),
                ResponseInit {
                    status: 201,
                    status_text: "Created".into(),
                    headers: Some(headers),
                },
            )
            .unwrap();

            let wire = response.into_http_response().unwrap();
            assert_eq!(wire.status(), 201);
            assert_eq!(wire.headers().get("x-marker").unwrap(), "yes");
            assert_eq!(wire.headers().get("content-length").unwrap(), "7");

            let collected = wire.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&collected[..], b"payload");
        })
        .await;
    }
}
