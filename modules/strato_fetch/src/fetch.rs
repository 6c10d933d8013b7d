// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use strato_abort::AbortSignal;
use strato_exceptions::{WebError, WebResult};
use strato_url::Url;
use strato_utils::VERSION;
use tokio::select;
use tracing::trace;

use crate::body::{Body, WireBody};
use crate::body_stream::{create_body_stream, ContentEncoding};
use crate::headers::{Headers, HeadersGuard};
use crate::request::{Request, RequestInfo, RequestInit, RequestRedirect};
use crate::response::{stream_wire_body_parts, HttpBody, Response};

const MAX_REDIRECT_COUNT: u32 = 20;

type HyperClient = Client<HttpConnector, HttpBody>;

thread_local! {
    static CLIENT: HyperClient = Client::builder(TokioExecutor::new()).build_http();
}

/// fetch(resource, init) — the outbound half of the pipeline.
pub async fn fetch(
    resource: impl Into<RequestInfo>,
    init: Option<RequestInit>,
) -> WebResult<Response> {
    let request = Request::new(resource, init.unwrap_or_default())?;
    fetch_request(request).await
}

async fn fetch_request(request: Request) -> WebResult<Response> {
    let url = request.url();

    // https://fetch.spec.whatwg.org/#scheme-fetch
    match url.protocol().as_str() {
        "http:" | "https:" => {},
        "about:" | "blob:" | "data:" | "file:" => {
            return Err(WebError::type_error("Unsupported scheme"));
        },
        _ => return Err(WebError::type_error("Invalid scheme")),
    }

    // The user signal is wrapped as a dependent signal; aborting the user's
    // controller aborts this fetch without the reverse coupling.
    let signal = request.signal().map(|signal| AbortSignal::any(&[signal]));

    // Already aborted at entry: cancel any body and reject immediately.
    if let Some(reason) = signal.as_ref().and_then(AbortSignal::reason) {
        if let Some(body) = request.take_body() {
            if let Some(stream) = body.body() {
                let _ = stream.cancel(Some(reason.clone()));
            }
        }
        return Err(reason);
    }
    let abort_receiver = signal.as_ref().map(AbortSignal::subscribe);

    {
        let headers = request.headers();
        let mut headers = headers.borrow_mut();
        if !headers.has("accept") {
            headers.append("accept", "*/*")?;
        }
        if !headers.has("accept-language") {
            headers.append("accept-language", "*")?;
        }
        if !headers.has("accept-encoding") {
            headers.append("accept-encoding", "gzip, deflate, zstd, br")?;
        }
        if !headers.has("user-agent") {
            headers.append("user-agent", &["strato/", VERSION].concat())?;
        }
    }

    let method = request.method().clone();
    let headers = request.headers();
    let mut uri: Uri = url
        .href()
        .parse()
        .map_err(|_| WebError::type_error(format!("Invalid URL: {}", url.href())))?;
    let initial_uri = uri.clone();
    let mut url_list = vec![url];

    // A materialized source is resent on every hop; a raw stream can go on
    // the wire exactly once.
    let source = request.body_source();
    let mut outgoing_stream = match request.take_body() {
        None => None,
        Some(body) => match body.take_wire_body() {
            WireBody::Stream(stream) => Some(stream),
            _ => None,
        },
    };
    let has_stream_body = outgoing_stream.is_some();

    let mut redirect_count: u32 = 0;
    let mut response_status: u16 = 0;

    let (response, redirected) = loop {
        let mut abort_handle = None;
        let http_request = {
            let headers = headers.borrow();
            build_request(
                &method,
                &uri,
                &headers,
                source.clone(),
                &mut outgoing_stream,
                &mut abort_handle,
                response_status,
                &initial_uri,
            )?
        };

        let client = CLIENT.with(Clone::clone);
        let response = if let Some(abort_receiver) = &abort_receiver {
            select! {
                response = client.request(http_request) => response,
                reason = abort_receiver.recv() => {
                    // Mid-flight abort: tear down the outgoing body resource
                    // and surface the reason.
                    if let Some(handle) = abort_handle {
                        handle.close();
                    }
                    return Err(reason);
                }
            }
        } else {
            client.request(http_request).await
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                trace!(error = %e, "fetch transport failure");
                return Err(WebError::type_error("Network error"));
            },
        };

        if !response.status().is_redirection() {
            break (response, redirect_count > 0);
        }

        let location = match response
            .headers()
            .get(hyper::header::LOCATION)
            .and_then(|value| value.to_str().ok())
        {
            Some(location) => location.to_string(),
            None => break (response, redirect_count > 0),
        };

        match request.redirect() {
            RequestRedirect::Manual => break (response, redirect_count > 0),
            RequestRedirect::Error => {
                return Err(WebError::type_error("Unexpected redirect"));
            },
            RequestRedirect::Follow => {},
        }

        // A streaming body has no source to replay across a hop.
        if has_stream_body {
            return Err(WebError::type_error(
                "Cannot follow a redirect with a streaming request body",
            ));
        }

        redirect_count += 1;
        if redirect_count >= MAX_REDIRECT_COUNT {
            return Err(WebError::type_error("Maximum redirects exceeded"));
        }

        response_status = response.status().as_u16();
        let next = resolve_location(&uri, &location)?;
        uri = next
            .href()
            .parse()
            .map_err(|_| WebError::type_error("Invalid redirect location"))?;
        url_list.push(next);
        trace!(status = response_status, location = %uri, "following redirect");
    };

    // Response assembly: the decoded body rides a byte stream pulled from
    // the native decoder.
    let (parts, incoming) = response.into_parts();
    let status = parts.status.as_u16();
    let status_text = parts
        .status
        .canonical_reason()
        .unwrap_or_default()
        .to_string();
    let headers = Headers::from_http_headers(&parts.headers, HeadersGuard::Response);

    let content_encoding = ContentEncoding::from_header(
        parts
            .headers
            .get(hyper::header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok()),
    );
    let content_type = headers.get("content-type");

    let body_stream = create_body_stream(incoming, abort_receiver, content_encoding);
    let body = Body::from_stream(body_stream, content_type);

    Ok(Response::from_network(
        status,
        status_text,
        headers,
        body,
        url_list,
        redirected,
    ))
}

fn resolve_location(current: &Uri, location: &str) -> WebResult<Url> {
    let base = Url::parse(&current.to_string())?;
    Url::parse_with_base(location, base.href())
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    method: &Method,
    uri: &Uri,
    headers: &Headers,
    source: Option<Bytes>,
    outgoing_stream: &mut Option<strato_stream_web::ByteStream>,
    abort_handle: &mut Option<strato_utils::channel::BufferChannelReader<Bytes>>,
    prev_status: u16,
    initial_uri: &Uri,
) -> WebResult<hyper::Request<HttpBody>> {
    let same_origin = is_same_origin(uri, initial_uri);
    let change_method = should_change_method(prev_status, method);

    let method_to_use = if change_method {
        Method::GET
    } else {
        method.clone()
    };

    let mut builder = hyper::Request::builder()
        .method(method_to_use)
        .uri(uri.clone());

    for (key, value) in headers.iter() {
        // A rewritten method drops the body, and with it the body headers.
        if change_method && is_request_body_header_name(key) {
            continue;
        }
        // Credentials never cross origins.
        if !same_origin && is_cors_non_wildcard_request_header_name(key) {
            continue;
        }
        builder = builder.header(key, value);
    }

    let body: HttpBody = if change_method {
        Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
    } else if let Some(source) = source {
        Full::new(source).map_err(|never| match never {}).boxed_unsync()
    } else if let Some(stream) = outgoing_stream.take() {
        let (body, handle) = stream_wire_body_parts(stream);
        *abort_handle = Some(handle);
        body
    } else {
        Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
    };

    builder.body(body).map_err(|e| WebError::Op(e.to_string()))
}

fn is_same_origin(uri: &Uri, initial_uri: &Uri) -> bool {
    uri.scheme() == initial_uri.scheme()
        && uri.host() == initial_uri.host()
        && uri.authority().and_then(|a| a.port()) == initial_uri.authority().and_then(|a| a.port())
}

// https://fetch.spec.whatwg.org/#http-redirect-fetch
fn should_change_method(prev_status: u16, method: &Method) -> bool {
    if matches!(prev_status, 301 | 302) {
        return *method == Method::POST;
    }

    if prev_status == 303 {
        return !matches!(*method, Method::GET | Method::HEAD);
    }

    false
}

fn is_request_body_header_name(key: &str) -> bool {
    matches!(
        key,
        "content-encoding" | "content-language" | "content-location" | "content-type"
    )
}

fn is_cors_non_wildcard_request_header_name(key: &str) -> bool {
    matches!(key, "authorization")
}
