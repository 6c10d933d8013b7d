use std::{future::Future, rc::Rc};

use strato_exceptions::{WebError, WebResult};
use strato_utils::queue::Queue;

use crate::utils::promise::{rejected, Deferred, StreamFuture};

use super::byte_controller::{byte_controller_pull_into, byte_controller_release_steps};
use super::objects::{ByobReaderState, ByteView, ReaderState, SharedStream, StreamInner, StreamState};
use super::reader::{ByobRead, ChannelReadIntoRequest};
use super::stream::{readable_stream_cancel, ByteStream};

/// https://streams.spec.whatwg.org/#byob-reader-class
///
/// Only byte streams hand these out; the consumer supplies the buffer each
/// read fills, giving zero-copy byte flow.
pub struct ReadableStreamByobReader {
    stream: SharedStream<ByteView>,
    closed: Deferred,
}

impl ByteStream {
    /// getReader({ mode: "byob" }).
    pub fn get_byob_reader(&self) -> WebResult<ReadableStreamByobReader> {
        ReadableStreamByobReader::acquire(&self.inner)
    }
}

impl ReadableStreamByobReader {
    /// AcquireReadableStreamBYOBReader(stream).
    pub(crate) fn acquire(stream: &SharedStream<ByteView>) -> WebResult<Self> {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        // If stream.[[controller]] does not implement
        // ReadableByteStreamController, throw a TypeError exception.
        if !inner.controller.is_byte() {
            return Err(WebError::type_error(
                "Cannot use a BYOB reader with a non-byte stream",
            ));
        }

        // If ! IsReadableStreamLocked(stream) is true, throw a TypeError.
        if !inner.reader.is_none() {
            return Err(WebError::type_error(
                "ReadableStream is locked to a reader",
            ));
        }

        let closed = Deferred::new();
        match &inner.state {
            StreamState::Readable => {},
            StreamState::Closed => closed.resolve(),
            StreamState::Errored(e) => closed.reject(e.clone()),
        }

        inner.reader = ReaderState::Byob(ByobReaderState {
            read_into_requests: Queue::new(),
            closed: closed.clone(),
        });

        Ok(Self {
            stream: Rc::clone(stream),
            closed,
        })
    }

    fn is_active(&self, inner: &StreamInner<ByteView>) -> bool {
        inner
            .reader
            .closed()
            .map(|closed| closed.same_as(&self.closed))
            .unwrap_or(false)
    }

    /// read(view) — fills the caller's view with at least one element.
    pub async fn read(&self, view: ByteView) -> WebResult<ByobRead> {
        self.read_with_min(view, 1).await
    }

    /// read(view, { min }) — resolves only once `min` elements are filled
    /// (or the stream closes).
    pub async fn read_with_min(&self, view: ByteView, min_elements: usize) -> WebResult<ByobRead> {
        // If view.[[ByteLength]] is 0, return a promise rejected with a
        // TypeError exception.
        if view.byte_length() == 0 {
            return Err(WebError::type_error("view must have non-zero byteLength"));
        }
        if view.buffer_byte_length() == 0 {
            return Err(WebError::type_error(
                "view's buffer must have non-zero byteLength",
            ));
        }
        // If options["min"] is 0, return a promise rejected with a TypeError.
        if min_elements == 0 {
            return Err(WebError::type_error("options.min must be greater than 0"));
        }
        // If min × elementSize exceeds the view, that's a RangeError.
        if min_elements * view.element_size() > view.byte_length() {
            return Err(WebError::range_error(
                "options.min must be less than or equal to view's length",
            ));
        }

        {
            let mut guard = self.stream.borrow_mut();
            let inner = &mut *guard;

            if !self.is_active(inner) {
                return Err(WebError::type_error(
                    "This reader has been released and cannot be used to read",
                ));
            }

            // Set stream.[[disturbed]] to true.
            inner.disturbed = true;

            // If stream.[[state]] is "errored", perform readIntoRequest's
            // error steps given stream.[[storedError]].
            if let StreamState::Errored(e) = &inner.state {
                return Err(e.clone());
            }
        }

        // Otherwise, perform
        // ! ReadableByteStreamControllerPullInto(controller, view, min, req).
        let (request, rx) = ChannelReadIntoRequest::new();
        byte_controller_pull_into(&self.stream, view, min_elements, Box::new(request));

        rx.await
            .unwrap_or_else(|_| Err(WebError::type_error("The stream was destroyed")))
    }

    pub async fn closed(&self) -> WebResult<()> {
        self.closed.wait().await
    }

    pub fn cancel(&self, reason: Option<WebError>) -> impl Future<Output = WebResult<()>> {
        let fut: StreamFuture = {
            let active = self.is_active(&self.stream.borrow());
            if active {
                readable_stream_cancel(&self.stream, reason)
            } else {
                rejected(WebError::type_error(
                    "This reader has been released and cannot be used to cancel",
                ))
            }
        };
        async move { fut.await }
    }

    /// releaseLock() — the first pending descriptor survives reader-less
    /// (its filled bytes flow back through the queue); pending read-into
    /// requests are rejected.
    pub fn release_lock(&self) {
        let (requests, e) = {
            let mut guard = self.stream.borrow_mut();
            let inner = &mut *guard;
            if !self.is_active(inner) {
                return;
            }

            let e = WebError::type_error(
                "Reader was released and can no longer be used to monitor the stream's closedness",
            );
            self.closed.reject(e.clone());

            // Perform ! stream.[[controller]].[[ReleaseSteps]]().
            byte_controller_release_steps(inner);

            let requests = match std::mem::replace(&mut inner.reader, ReaderState::None) {
                ReaderState::Byob(reader) => reader.read_into_requests,
                _ => unreachable!("active BYOB reader just verified"),
            };
            (requests, e)
        };

        let mut requests = requests;
        for request in requests.drain() {
            request.error_steps(e.clone());
        }
    }
}
