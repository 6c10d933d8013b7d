// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use strato_exceptions::{WebError, WebResult};
use strato_fetch::{HttpBody, RequestResource};
use strato_utils::{
    channel::{BufferChannel, BufferChannelReader, BufferChannelWriter},
    mc_oneshot,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// One inbound request parked at the native boundary: the lazily-read
/// resource and the one-shot used to ship exactly one response back.
pub(crate) struct RequestEvent {
    pub resource: RequestResource,
    pub sender: oneshot::Sender<hyper::Response<HttpBody>>,
}

/// Binds the listener and starts the accept loop on the current task set.
/// The returned reader yields request events until shutdown.
pub(crate) async fn start_server(
    hostname: &str,
    port: u16,
    shutdown: Option<mc_oneshot::Receiver<WebError>>,
) -> WebResult<(BufferChannelReader<RequestEvent>, SocketAddr)> {
    let listener = TcpListener::bind((hostname, port))
        .await
        .map_err(WebError::op_error)?;
    let local_addr = listener.local_addr().map_err(WebError::op_error)?;

    let channel = BufferChannel::new(128);
    let reader = channel.reader();
    let writer = channel.writer();

    tokio::task::spawn_local(accept_loop(listener, writer, shutdown));

    Ok((reader, local_addr))
}

async fn accept_loop(
    listener: TcpListener,
    writer: BufferChannelWriter<RequestEvent>,
    shutdown: Option<mc_oneshot::Receiver<WebError>>,
) {
    loop {
        let accepted = if let Some(shutdown) = &shutdown {
            tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => {
                    trace!("listener shut down by signal");
                    break;
                }
            }
        } else {
            listener.accept().await
        };

        match accepted {
            Ok((stream, remote)) => {
                trace!(%remote, "accepted connection");
                tokio::task::spawn_local(serve_connection(stream, writer.clone()));
            },
            Err(e) => {
                warn!(error = %e, "accept failed");
            },
        }
    }

    // In-flight handlers finish; the engine loop observes the closed
    // channel and exits.
    writer.close();
}

async fn serve_connection(stream: TcpStream, writer: BufferChannelWriter<RequestEvent>) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let writer = writer.clone();
        async move {
            let keep_alive = wants_keep_alive(&request);
            let (parts, body) = request.into_parts();
            let (sender, response_rx) = oneshot::channel();

            let event = RequestEvent {
                resource: RequestResource::new(parts, body, keep_alive),
                sender,
            };
            if writer.write(event).await.is_err() {
                // Listener already shut down.
                return Ok::<_, Infallible>(canned_500());
            }

            match response_rx.await {
                Ok(response) => Ok(response),
                // The sender was dropped without responding.
                Err(_) => Ok(canned_500()),
            }
        }
    });

    if let Err(e) = hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
    {
        trace!(error = %e, "connection ended with error");
    }
}

fn wants_keep_alive(request: &hyper::Request<Incoming>) -> bool {
    let connection = request
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if connection.eq_ignore_ascii_case("close") {
        return false;
    }
    request.version() >= hyper::Version::HTTP_11 || connection.eq_ignore_ascii_case("keep-alive")
}

/// The degraded response for every path where nothing better exists.
pub(crate) fn canned_500() -> hyper::Response<HttpBody> {
    hyper::Response::builder()
        .status(500)
        .header("content-type", "text/plain")
        .body(
            Full::new(Bytes::from_static(b"Internal Server Error"))
                .map_err(|never| match never {})
                .boxed_unsync(),
        )
        .expect("static 500 response always builds")
}
