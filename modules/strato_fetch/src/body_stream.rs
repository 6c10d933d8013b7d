// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Adapters between hyper bodies and byte ReadableStreams: decoded
//! response bodies, inbound request bodies and materialized sources.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::http::request::Parts;
use strato_exceptions::WebError;
use strato_stream_web::{
    ByteStream, ByteView, ReadableByteStreamController, UnderlyingByteSource,
};
use strato_utils::mc_oneshot;
use tokio::{select, sync::mpsc};
use tracing::trace;

use crate::decompress::StreamingDecoder;

/// Supported content encodings for streaming decompression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
    Identity,
}

impl ContentEncoding {
    /// Parse a content-encoding header value.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("gzip") => ContentEncoding::Gzip,
            Some("deflate") => ContentEncoding::Deflate,
            Some("br") => ContentEncoding::Brotli,
            Some("zstd") => ContentEncoding::Zstd,
            _ => ContentEncoding::Identity,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
            ContentEncoding::Zstd => "zstd",
            ContentEncoding::Identity => "",
        }
    }
}

/// Frames shipped from the body reader task to the stream's pull.
enum BodyChunk {
    Data(Bytes),
    End,
    Error(String),
}

/// Wraps a hyper body as a byte ReadableStream, decoding per
/// content-encoding as frames arrive. An aborted signal tears the body
/// down mid-flight.
pub(crate) fn create_body_stream<B>(
    body: B,
    abort_receiver: Option<mc_oneshot::Receiver<WebError>>,
    content_encoding: ContentEncoding,
) -> ByteStream
where
    B: http_body::Body<Data = Bytes> + Unpin + 'static,
    B::Error: std::fmt::Display,
{
    let (tx, rx) = mpsc::channel::<BodyChunk>(4);

    tokio::task::spawn_local(async move {
        read_body_frames(body, tx, abort_receiver, content_encoding).await;
    });

    channel_stream(rx)
}

async fn read_body_frames<B>(
    mut body: B,
    tx: mpsc::Sender<BodyChunk>,
    abort_receiver: Option<mc_oneshot::Receiver<WebError>>,
    content_encoding: ContentEncoding,
) where
    B: http_body::Body<Data = Bytes> + Unpin + 'static,
    B::Error: std::fmt::Display,
{
    let mut decoder = match StreamingDecoder::new(content_encoding.label()) {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = tx.send(BodyChunk::Error(e.to_string())).await;
            return;
        },
    };

    loop {
        let frame = if let Some(abort_receiver) = &abort_receiver {
            select! {
                frame = body.frame() => frame,
                reason = abort_receiver.recv() => {
                    let _ = tx.send(BodyChunk::Error(reason.to_string())).await;
                    return;
                }
            }
        } else {
            body.frame().await
        };

        match frame {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    match decoder.decompress_chunk(&data) {
                        Ok(decoded) => {
                            if !decoded.is_empty()
                                && tx.send(BodyChunk::Data(decoded.into())).await.is_err()
                            {
                                return;
                            }
                        },
                        Err(e) => {
                            let _ = tx
                                .send(BodyChunk::Error(format!("Decompression error: {}", e)))
                                .await;
                            return;
                        },
                    }
                }
            },
            Some(Err(e)) => {
                let _ = tx.send(BodyChunk::Error(e.to_string())).await;
                return;
            },
            None => {
                // End of stream: flush whatever the decoder still holds.
                match decoder.finish() {
                    Ok(remaining) => {
                        if !remaining.is_empty() {
                            let _ = tx.send(BodyChunk::Data(remaining.into())).await;
                        }
                    },
                    Err(e) => {
                        let _ = tx
                            .send(BodyChunk::Error(format!("Decompression error: {}", e)))
                            .await;
                        return;
                    },
                }
                let _ = tx.send(BodyChunk::End).await;
                return;
            },
        }
    }
}

/// A byte stream pulling from the reader task's channel.
fn channel_stream(receiver: mpsc::Receiver<BodyChunk>) -> ByteStream {
    let receiver = Rc::new(RefCell::new(Some(receiver)));
    let source = UnderlyingByteSource::default()
        .with_pull({
            let receiver = Rc::clone(&receiver);
            move |controller: ReadableByteStreamController| {
                let receiver = Rc::clone(&receiver);
                Box::pin(async move {
                    // Take the receiver out of the cell; the borrow must
                    // not be held across the await.
                    let mut rx = match receiver.borrow_mut().take() {
                        Some(rx) => rx,
                        None => return Ok(()),
                    };
                    let chunk = rx.recv().await;
                    receiver.borrow_mut().replace(rx);

                    match chunk {
                        Some(BodyChunk::Data(data)) => {
                            controller.enqueue(ByteView::from_vec(data.to_vec()))
                        },
                        Some(BodyChunk::End) | None => {
                            receiver.borrow_mut().take();
                            controller.close()
                        },
                        Some(BodyChunk::Error(message)) => {
                            trace!(error = %message, "body stream failed");
                            Err(WebError::Op(message))
                        },
                    }
                })
            }
        })
        .with_cancel({
            let receiver = Rc::clone(&receiver);
            move |_reason| {
                // Dropping the receiver stops the reader task.
                receiver.borrow_mut().take();
                Box::pin(std::future::ready(Ok(())))
            }
        });

    ByteStream::bytes(source).expect("byte sources without autoAllocate always construct")
}

/// A one-shot stream over an already materialized byte sequence.
pub(crate) fn bytes_stream(bytes: Bytes) -> ByteStream {
    let source = UnderlyingByteSource::default().with_start(
        move |controller: ReadableByteStreamController| {
            if !bytes.is_empty() {
                controller.enqueue(ByteView::from_vec(bytes.to_vec()))?;
            }
            controller.close()
        },
    );
    ByteStream::bytes(source).expect("byte sources without autoAllocate always construct")
}

/// An inbound request parked at the native boundary. Field reads happen on
/// demand, so materializing a `Request` stays cheap until the handler
/// actually looks.
#[derive(Debug)]
pub struct RequestResource {
    parts: Parts,
    body: RefCell<Option<Incoming>>,
    keep_alive: bool,
}

impl RequestResource {
    pub fn new(parts: Parts, body: Incoming, keep_alive: bool) -> Self {
        Self {
            parts,
            body: RefCell::new(Some(body)),
            keep_alive,
        }
    }

    pub fn method(&self) -> &hyper::Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &hyper::Uri {
        &self.parts.uri
    }

    pub fn http_headers(&self) -> &hyper::HeaderMap {
        &self.parts.headers
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The request body as a byte stream; `None` after the first take.
    pub fn take_body_stream(&self) -> Option<ByteStream> {
        self.body
            .borrow_mut()
            .take()
            .map(|incoming| create_body_stream(incoming, None, ContentEncoding::Identity))
    }
}
