// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
mod server;

use std::{future::Future, rc::Rc};

use strato_abort::AbortSignal;
use strato_exceptions::{WebError, WebResult};
use strato_fetch::{Request, Response};
use strato_utils::channel::ChannelError;
use tracing::warn;

use server::RequestEvent;

/// What `onListen` receives once the listener is up.
pub struct ServeAddr {
    pub hostname: String,
    pub port: u16,
    pub key: Option<String>,
    pub cert: Option<String>,
}

type OnError = Rc<dyn Fn(WebError) -> WebResult<Response>>;

pub struct ServeOptions {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    /// Aborting stops the listener; in-flight handlers complete.
    pub signal: Option<AbortSignal>,
    /// Carried through to `onListen`; TLS termination is the host's
    /// concern, not done here.
    pub key: Option<String>,
    pub cert: Option<String>,
    pub on_listen: Option<Box<dyn FnOnce(ServeAddr)>>,
    pub on_error: Option<OnError>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            hostname: None,
            port: None,
            signal: None,
            key: None,
            cert: None,
            on_listen: None,
            on_error: None,
        }
    }
}

/// serve(options, handler) — starts the listener and dispatches request
/// events to the handler until the options signal aborts.
///
/// Events are taken in arrival order; each handler runs as its own task,
/// so responses may complete out of order. Every sender ships exactly one
/// response.
pub async fn serve<H, Fut>(mut options: ServeOptions, handler: H) -> WebResult<()>
where
    H: Fn(Request) -> Fut + 'static,
    Fut: Future<Output = WebResult<Response>> + 'static,
{
    let hostname = options.hostname.take().unwrap_or_else(|| "127.0.0.1".into());
    let port = options.port.unwrap_or(8000);
    let shutdown = options.signal.as_ref().map(AbortSignal::subscribe);

    let (reader, local_addr) = server::start_server(&hostname, port, shutdown).await?;

    if let Some(on_listen) = options.on_listen.take() {
        on_listen(ServeAddr {
            hostname: local_addr.ip().to_string(),
            port: local_addr.port(),
            key: options.key.clone(),
            cert: options.cert.clone(),
        });
    }

    let handler = Rc::new(handler);
    let on_error = options.on_error.clone();

    loop {
        // Synchronous try first; fall back to the async op on Empty.
        let event = match reader.try_read() {
            Ok(event) => Some(event),
            Err(ChannelError::Empty) => reader.read().await,
            Err(ChannelError::Closed) => None,
            Err(ChannelError::Full) => unreachable!("try_read never reports Full"),
        };

        // End of stream: the listener has shut down.
        let Some(event) = event else { break };

        tokio::task::spawn_local(handle_event(
            event,
            Rc::clone(&handler),
            on_error.clone(),
        ));
    }

    Ok(())
}

async fn handle_event<H, Fut>(event: RequestEvent, handler: Rc<H>, on_error: Option<OnError>)
where
    H: Fn(Request) -> Fut + 'static,
    Fut: Future<Output = WebResult<Response>> + 'static,
{
    let RequestEvent { resource, sender } = event;

    let response = match Request::from_resource(Rc::new(resource)) {
        Ok(request) => match handler(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "request handler failed");
                match &on_error {
                    Some(on_error) => match on_error(e) {
                        Ok(response) => Some(response),
                        // onError itself failed: degrade to the canned 500.
                        Err(e) => {
                            warn!(error = %e, "onError failed");
                            None
                        },
                    },
                    None => None,
                }
            },
        },
        Err(e) => {
            warn!(error = %e, "request materialization failed");
            None
        },
    };

    let wire = match response.map(Response::into_http_response) {
        Some(Ok(wire)) => wire,
        Some(Err(e)) => {
            warn!(error = %e, "response serialization failed");
            server::canned_500()
        },
        None => server::canned_500(),
    };

    // One response per sender, exactly once; a dropped receiver means the
    // connection is already gone.
    let _ = sender.send(wire);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strato_abort::AbortController;
    use strato_fetch::{fetch, BodyInit, RequestInit, ResponseInit};
    use strato_stream_web::{ByteStream, ByteView, UnderlyingByteSource};
    use strato_test::test_local;
    use tokio::sync::oneshot;

    use super::*;

    fn options_with_listen(
        signal: AbortSignal,
        addr_tx: oneshot::Sender<ServeAddr>,
    ) -> ServeOptions {
        ServeOptions {
            port: Some(0),
            signal: Some(signal),
            on_listen: Some(Box::new(move |addr| {
                let _ = addr_tx.send(addr);
            })),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn round_trips_a_request() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            tokio::task::spawn_local(serve(
                options_with_listen(controller.signal(), addr_tx),
                |_request| async {
                    Response::new(
                        Some(BodyInit::Text("ok".into())),
                        ResponseInit {
                            status: 200,
                            ..Default::default()
                        },
                    )
                },
            ));

            let addr = addr_rx.await.unwrap();
            let url = format!("http://{}:{}/", addr.hostname, addr.port);
            let response = fetch(url.as_str(), None).await.unwrap();

            assert_eq!(response.status(), 200);
            assert_eq!(
                response.headers().borrow().get("content-type").unwrap(),
                "text/plain;charset=UTF-8"
            );
            assert_eq!(response.text().await.unwrap(), "ok");

            controller.abort(None);
        })
        .await;
    }

    #[tokio::test]
    async fn handler_sees_method_url_headers_and_body() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            tokio::task::spawn_local(serve(
                options_with_listen(controller.signal(), addr_tx),
                |request| async move {
                    assert_eq!(request.method().as_str(), "POST");
                    assert_eq!(request.url().pathname(), "/echo");
                    let marker = request.headers().borrow().get("x-marker");
                    assert_eq!(marker.unwrap(), "42");
                    let text = request.text().await?;
                    Response::new(
                        Some(BodyInit::Text(format!("got: {}", text))),
                        ResponseInit::default(),
                    )
                },
            ));

            let addr = addr_rx.await.unwrap();
            let url = format!("http://{}:{}/echo", addr.hostname, addr.port);

            let mut headers = strato_fetch::Headers::new();
            headers.set("x-marker", "42").unwrap();
            let response = fetch(
                url.as_str(),
                Some(RequestInit {
                    method: Some("POST".into()),
                    headers: Some(headers),
                    body: Some(BodyInit::Text("payload".into())),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

            assert_eq!(response.text().await.unwrap(), "got: payload");
            controller.abort(None);
        })
        .await;
    }

    #[tokio::test]
    async fn handler_failure_degrades_to_500() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            tokio::task::spawn_local(serve(
                options_with_listen(controller.signal(), addr_tx),
                |_request| async { Err(WebError::type_error("boom")) },
            ));

            let addr = addr_rx.await.unwrap();
            let url = format!("http://{}:{}/", addr.hostname, addr.port);
            let response = fetch(url.as_str(), None).await.unwrap();

            assert_eq!(response.status(), 500);
            assert_eq!(
                response.headers().borrow().get("content-type").unwrap(),
                "text/plain"
            );
            assert_eq!(response.text().await.unwrap(), "Internal Server Error");
            controller.abort(None);
        })
        .await;
    }

    #[tokio::test]
    async fn on_error_shapes_the_failure_response() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            let mut options = options_with_listen(controller.signal(), addr_tx);
            options.on_error = Some(Rc::new(|e| {
                Response::new(
                    Some(BodyInit::Text(format!("handled: {}", e))),
                    ResponseInit {
                        status: 503,
                        ..Default::default()
                    },
                )
            }));

            tokio::task::spawn_local(serve(options, |_request| async {
                Err(WebError::type_error("boom"))
            }));

            let addr = addr_rx.await.unwrap();
            let url = format!("http://{}:{}/", addr.hostname, addr.port);
            let response = fetch(url.as_str(), None).await.unwrap();

            assert_eq!(response.status(), 503);
            assert_eq!(
                response.text().await.unwrap(),
                "handled: TypeError: boom"
            );
            controller.abort(None);
        })
        .await;
    }

    #[tokio::test]
    async fn streams_a_response_body() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            tokio::task::spawn_local(serve(
                options_with_listen(controller.signal(), addr_tx),
                |_request| async {
                    let mut chunks = vec![&b"str"[..], &b"eam"[..], &b"ed"[..]].into_iter();
                    let stream = ByteStream::bytes(UnderlyingByteSource::default().with_pull(
                        move |controller: strato_stream_web::ReadableByteStreamController| {
                            let next = chunks.next();
                            Box::pin(async move {
                                match next {
                                    Some(chunk) => controller.enqueue(ByteView::from(chunk)),
                                    None => controller.close(),
                                }
                            })
                        },
                    ))?;
                    Response::new(Some(BodyInit::Stream(stream)), ResponseInit::default())
                },
            ));

            let addr = addr_rx.await.unwrap();
            let url = format!("http://{}:{}/", addr.hostname, addr.port);
            let response = fetch(url.as_str(), None).await.unwrap();
            assert_eq!(response.text().await.unwrap(), "streamed");
            controller.abort(None);
        })
        .await;
    }

    #[tokio::test]
    async fn abort_stops_the_listener() {
        test_local(async {
            let controller = AbortController::new();
            let (addr_tx, addr_rx) = oneshot::channel();

            let serve_task = tokio::task::spawn_local(serve(
                options_with_listen(controller.signal(), addr_tx),
                |_request| async { Response::new(None, ResponseInit::default()) },
            ));

            let _addr = addr_rx.await.unwrap();
            controller.abort(None);

            tokio::time::timeout(Duration::from_secs(1), serve_task)
                .await
                .expect("serve loop exits after abort")
                .unwrap()
                .unwrap();
        })
        .await;
    }
}
