// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{cell::RefCell, rc::Rc};

use hyper::Method;
use strato_abort::AbortSignal;
use strato_exceptions::{WebError, WebResult};
use strato_url::Url;

use crate::body::{Body, BodyInit};
use crate::body_stream::RequestResource;
use crate::headers::{Headers, HeadersGuard};

// https://fetch.spec.whatwg.org/#concept-request-mode
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
    Navigate,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum RequestCredentials {
    #[default]
    SameOrigin,
    Omit,
    Include,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum RequestCache {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub enum RequestRedirect {
    #[default]
    Follow,
    Error,
    Manual,
}

/// Everything `new Request(input, init)` accepts beside the resource.
#[derive(Default)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: Option<Headers>,
    pub body: Option<BodyInit>,
    pub mode: Option<RequestMode>,
    pub credentials: Option<RequestCredentials>,
    pub cache: Option<RequestCache>,
    pub redirect: Option<RequestRedirect>,
    pub keepalive: Option<bool>,
    pub signal: Option<AbortSignal>,
}

pub enum RequestInfo {
    Url(Url),
    Text(String),
    Request(Request),
}

impl From<Url> for RequestInfo {
    fn from(url: Url) -> Self {
        RequestInfo::Url(url)
    }
}

impl From<&str> for RequestInfo {
    fn from(url: &str) -> Self {
        RequestInfo::Text(url.into())
    }
}

impl From<String> for RequestInfo {
    fn from(url: String) -> Self {
        RequestInfo::Text(url)
    }
}

impl From<Request> for RequestInfo {
    fn from(request: Request) -> Self {
        RequestInfo::Request(request)
    }
}

/// The inner request record plus its public accessors.
///
/// An inbound request is backed by a native resource and materializes its
/// fields on first access; field reads may therefore perform op calls.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url_list: RefCell<Vec<Url>>,
    headers: Rc<RefCell<Headers>>,
    body: RefCell<Option<Rc<Body>>>,
    mode: RequestMode,
    credentials: RequestCredentials,
    cache: RequestCache,
    redirect: RequestRedirect,
    keepalive: bool,
    signal: Option<AbortSignal>,
    use_cors_preflight: bool,
    resource: Option<Rc<RequestResource>>,
}

impl Request {
    /// new Request(input, init) — the Fetch spec's request initialization
    /// for the subset carried here.
    pub fn new(input: impl Into<RequestInfo>, init: RequestInit) -> WebResult<Self> {
        let (url, base) = match input.into() {
            RequestInfo::Url(url) => (url, None),
            RequestInfo::Text(text) => (Url::parse(&text)?, None),
            RequestInfo::Request(request) => {
                let url = request.url();
                (url, Some(request))
            },
        };

        let method = match init.method.as_deref() {
            None => base
                .as_ref()
                .map(|r| r.method.clone())
                .unwrap_or(Method::GET),
            Some(method) => parse_method(method)?,
        };

        // If init["mode"] is "navigate", then throw a TypeError.
        let mode = match init.mode {
            Some(RequestMode::Navigate) => {
                return Err(WebError::type_error(
                    "Cannot construct a Request with a RequestMode of navigate",
                ))
            },
            Some(mode) => mode,
            None => base.as_ref().map(|r| r.mode).unwrap_or_default(),
        };

        let cache = init
            .cache
            .or_else(|| base.as_ref().map(|r| r.cache))
            .unwrap_or_default();
        // If request's cache mode is "only-if-cached" and request's mode is
        // not "same-origin", then throw a TypeError.
        if cache == RequestCache::OnlyIfCached && mode != RequestMode::SameOrigin {
            return Err(WebError::type_error(
                "only-if-cached can only be used with same-origin mode",
            ));
        }

        let credentials = init
            .credentials
            .or_else(|| base.as_ref().map(|r| r.credentials))
            .unwrap_or_default();
        let redirect = init
            .redirect
            .or_else(|| base.as_ref().map(|r| r.redirect))
            .unwrap_or_default();
        let keepalive = init
            .keepalive
            .or_else(|| base.as_ref().map(|r| r.keepalive))
            .unwrap_or(false);
        let signal = init
            .signal
            .or_else(|| base.as_ref().and_then(|r| r.signal.clone()));

        let mut headers = match init.headers {
            Some(headers) => headers,
            None => base
                .as_ref()
                .map(|r| r.headers.borrow().clone())
                .unwrap_or_default(),
        };
        headers.set_guard(HeadersGuard::Request);

        // If init["body"] exists and is non-null, extract it.
        let body = match (init.body, base) {
            (Some(init_body), _) => {
                // If method is GET or HEAD, then throw a TypeError.
                if matches!(method, Method::GET | Method::HEAD) {
                    return Err(WebError::type_error(
                        "Request with GET/HEAD method cannot have body",
                    ));
                }
                Some(Rc::new(Body::from_init(init_body, keepalive)?))
            },
            (None, Some(base)) => base.body.borrow_mut().take(),
            (None, None) => None,
        };

        let mut use_cors_preflight = false;
        if let Some(body) = &body {
            // A raw-stream body (null source) restricts the mode and forces
            // a CORS preflight.
            if body.has_body() && body.source().is_none() && body.length().is_none() {
                if !matches!(mode, RequestMode::SameOrigin | RequestMode::Cors) {
                    return Err(WebError::type_error(
                        "ReadableStream request bodies require same-origin or cors mode",
                    ));
                }
                use_cors_preflight = true;
            }

            // Body's content type lands in the header list when absent.
            if let Some(content_type) = body.content_type() {
                if !headers.has("content-type") {
                    headers.append("content-type", &content_type)?;
                }
            }
        }

        Ok(Self {
            method,
            url_list: RefCell::new(vec![url]),
            headers: Rc::new(RefCell::new(headers)),
            body: RefCell::new(body),
            mode,
            credentials,
            cache,
            redirect,
            keepalive,
            signal,
            use_cors_preflight,
            resource: None,
        })
    }

    /// Materializes a request over an inbound resource; fields are read
    /// lazily from it.
    pub fn from_resource(resource: Rc<RequestResource>) -> WebResult<Self> {
        let method = resource.method().clone();
        let keepalive = resource.keep_alive();
        Ok(Self {
            method,
            url_list: RefCell::new(Vec::new()),
            headers: Rc::new(RefCell::new(Headers::default())),
            body: RefCell::new(None),
            mode: RequestMode::SameOrigin,
            credentials: RequestCredentials::default(),
            cache: RequestCache::default(),
            redirect: RequestRedirect::default(),
            keepalive,
            signal: None,
            use_cors_preflight: false,
            resource: Some(resource),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The current URL: last in the URL list. For resource-backed requests
    /// the first access reads it from the op layer.
    pub fn url(&self) -> Url {
        {
            let mut url_list = self.url_list.borrow_mut();
            if url_list.is_empty() {
                let resource = self
                    .resource
                    .as_ref()
                    .expect("a request without URLs is resource-backed");
                let uri = resource.uri();
                let text = match uri.host() {
                    // Relative-form targets are rooted at the listener host.
                    None => format!(
                        "http://{}{}",
                        resource
                            .http_headers()
                            .get(hyper::header::HOST)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("localhost"),
                        uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
                    ),
                    Some(_) => uri.to_string(),
                };
                if let Ok(url) = Url::parse(&text) {
                    url_list.push(url);
                }
            }
        }
        self.url_list
            .borrow()
            .last()
            .cloned()
            .expect("url list populated above")
    }

    /// Live header list; resource-backed requests copy theirs over on the
    /// first access.
    pub fn headers(&self) -> Rc<RefCell<Headers>> {
        if let Some(resource) = &self.resource {
            let mut headers = self.headers.borrow_mut();
            if headers.is_empty() && !resource.http_headers().is_empty() {
                *headers =
                    Headers::from_http_headers(resource.http_headers(), HeadersGuard::Request);
            }
        }
        Rc::clone(&self.headers)
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn credentials(&self) -> RequestCredentials {
        self.credentials
    }

    pub fn cache(&self) -> RequestCache {
        self.cache
    }

    pub fn redirect(&self) -> RequestRedirect {
        self.redirect
    }

    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub fn signal(&self) -> Option<AbortSignal> {
        self.signal.clone()
    }

    pub(crate) fn use_cors_preflight(&self) -> bool {
        self.use_cors_preflight
    }

    /// The body handle is cloned out of the slot so no cell borrow is held
    /// across consumption awaits.
    fn ensure_body(&self) -> Option<Rc<Body>> {
        let mut body = self.body.borrow_mut();
        if body.is_none() {
            if let Some(resource) = &self.resource {
                // May be a fully buffered sequence or a stream; here the
                // op hands over a stream and the mix-in does the rest.
                if let Some(stream) = resource.take_body_stream() {
                    let content_type = self.headers().borrow().get("content-type");
                    *body = Some(Rc::new(Body::from_stream(stream, content_type)));
                }
            }
        }
        body.clone()
    }

    pub fn body_used(&self) -> bool {
        self.ensure_body()
            .map(|body| body.body_used())
            .unwrap_or(false)
    }

    pub fn body(&self) -> Option<strato_stream_web::ByteStream> {
        self.ensure_body().and_then(|body| body.body())
    }

    pub async fn bytes(&self) -> WebResult<Vec<u8>> {
        match self.ensure_body() {
            Some(body) => body.bytes().await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn array_buffer(&self) -> WebResult<Vec<u8>> {
        self.bytes().await
    }

    pub async fn text(&self) -> WebResult<String> {
        match self.ensure_body() {
            Some(body) => body.text().await,
            None => Ok(String::new()),
        }
    }

    pub async fn json(&self) -> WebResult<serde_json::Value> {
        match self.ensure_body() {
            Some(body) => body.json().await,
            None => Err(WebError::syntax_error("JSON input is empty")),
        }
    }

    pub(crate) fn body_source(&self) -> Option<bytes::Bytes> {
        self.ensure_body().and_then(|body| body.source())
    }

    pub(crate) fn take_body(&self) -> Option<Rc<Body>> {
        self.ensure_body();
        self.body.borrow_mut().take()
    }
}

pub(crate) fn parse_method(method: &str) -> WebResult<Method> {
    match method {
        "GET" | "get" => Ok(Method::GET),
        "POST" | "post" => Ok(Method::POST),
        "PUT" | "put" => Ok(Method::PUT),
        "DELETE" | "delete" => Ok(Method::DELETE),
        "HEAD" | "head" => Ok(Method::HEAD),
        "OPTIONS" | "options" => Ok(Method::OPTIONS),
        "PATCH" | "patch" => Ok(Method::PATCH),
        "CONNECT" => Ok(Method::CONNECT),
        "TRACE" => Ok(Method::TRACE),
        _ => Err(WebError::type_error(format!(
            "Invalid HTTP method: {}",
            method
        ))),
    }
}

#[cfg(test)]
mod tests {
    use strato_test::test_local;

    use super::*;

    #[test]
    fn get_with_body_is_a_type_error() {
        let err = Request::new(
            "https://x/",
            RequestInit {
                method: Some("GET".into()),
                body: Some(BodyInit::Text("x".into())),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, WebError::Type(_)));
    }

    #[test]
    fn navigate_mode_is_not_user_settable() {
        let err = Request::new(
            "https://x/",
            RequestInit {
                mode: Some(RequestMode::Navigate),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, WebError::Type(_)));
    }

    #[test]
    fn only_if_cached_requires_same_origin() {
        let err = Request::new(
            "https://x/",
            RequestInit {
                cache: Some(RequestCache::OnlyIfCached),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, WebError::Type(_)));

        Request::new(
            "https://x/",
            RequestInit {
                cache: Some(RequestCache::OnlyIfCached),
                mode: Some(RequestMode::SameOrigin),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn url_search_params_body_sets_form_content_type() {
        test_local(async {
            let request = Request::new(
                "https://x/",
                RequestInit {
                    method: Some("POST".into()),
                    body: Some(BodyInit::SearchParams(
                        strato_url::UrlSearchParams::from_pairs([("a", "1")]),
                    )),
                    ..Default::default()
                },
            )
            .unwrap();

            assert_eq!(
                request.headers().borrow().get("content-type").unwrap(),
                "application/x-www-form-urlencoded;charset=UTF-8"
            );
            assert_eq!(request.text().await.unwrap(), "a=1");
        })
        .await;
    }

    #[tokio::test]
    async fn stream_bodies_demand_cors_or_same_origin() {
        test_local(async {
            let stream = crate::body_stream::bytes_stream(bytes::Bytes::from_static(b"s"));
            let err = Request::new(
                "https://x/",
                RequestInit {
                    method: Some("POST".into()),
                    mode: Some(RequestMode::NoCors),
                    body: Some(BodyInit::Stream(stream)),
                    ..Default::default()
                },
            )
            .unwrap_err();
            assert!(matches!(err, WebError::Type(_)));

            let stream = crate::body_stream::bytes_stream(bytes::Bytes::from_static(b"s"));
            let request = Request::new(
                "https://x/",
                RequestInit {
                    method: Some("POST".into()),
                    body: Some(BodyInit::Stream(stream)),
                    ..Default::default()
                },
            )
            .unwrap();
            assert!(request.use_cors_preflight());
        })
        .await;
    }

    #[test]
    fn invalid_method_is_rejected() {
        let err = Request::new(
            "https://x/",
            RequestInit {
                method: Some("YEET".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, WebError::Type(_)));
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(Request::new("not a url", RequestInit::default()).is_err());
    }
}
