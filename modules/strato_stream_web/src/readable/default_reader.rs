use std::{future::Future, rc::Rc};

use strato_exceptions::{WebError, WebResult};
use strato_utils::queue::Queue;

use crate::utils::promise::{rejected, Deferred, StreamFuture};

use super::byte_controller::{byte_controller_pull_steps, byte_controller_release_steps};
use super::default_controller::default_controller_pull_steps;
use super::objects::{
    ControllerState, DefaultReaderState, ReaderState, SharedStream, StreamInner, StreamState,
};
use super::reader::ChannelReadRequest;
use super::stream::{readable_stream_cancel, ReadableStream};

enum ReadDispatch {
    Closed,
    Errored(WebError),
    DefaultController,
    ByteController,
}

/// https://streams.spec.whatwg.org/#default-reader-class
pub struct ReadableStreamDefaultReader<T: 'static> {
    stream: SharedStream<T>,
    closed: Deferred,
}

impl<T: 'static> ReadableStream<T> {
    /// getReader() — acquires an exclusive default reader.
    pub fn get_reader(&self) -> WebResult<ReadableStreamDefaultReader<T>> {
        ReadableStreamDefaultReader::acquire(&self.inner)
    }
}

impl<T: 'static> ReadableStreamDefaultReader<T> {
    /// AcquireReadableStreamDefaultReader(stream).
    pub(crate) fn acquire(stream: &SharedStream<T>) -> WebResult<Self> {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        // If ! IsReadableStreamLocked(stream) is true, throw a TypeError.
        if !inner.reader.is_none() {
            return Err(WebError::type_error(
                "ReadableStream is locked to a reader",
            ));
        }

        // ReadableStreamReaderGenericInitialize: the closed promise tracks
        // the stream's current state.
        let closed = Deferred::new();
        match &inner.state {
            StreamState::Readable => {},
            StreamState::Closed => closed.resolve(),
            StreamState::Errored(e) => closed.reject(e.clone()),
        }

        inner.reader = ReaderState::Default(DefaultReaderState {
            read_requests: Queue::new(),
            closed: closed.clone(),
        });

        Ok(Self {
            stream: Rc::clone(stream),
            closed,
        })
    }

    fn is_active(&self, inner: &StreamInner<T>) -> bool {
        inner
            .reader
            .closed()
            .map(|closed| closed.same_as(&self.closed))
            .unwrap_or(false)
    }

    /// read() — resolves with the next chunk, or `None` once the stream is
    /// done. Requests are satisfied strictly FIFO.
    pub async fn read(&self) -> WebResult<Option<T>> {
        let dispatch = {
            let mut guard = self.stream.borrow_mut();
            let inner = &mut *guard;

            if !self.is_active(inner) {
                return Err(WebError::type_error(
                    "This reader has been released and cannot be used to read",
                ));
            }

            // Set stream.[[disturbed]] to true.
            inner.disturbed = true;

            match &inner.state {
                // If stream.[[state]] is "closed", perform readRequest's
                // close steps.
                StreamState::Closed => ReadDispatch::Closed,
                // If stream.[[state]] is "errored", perform readRequest's
                // error steps given stream.[[storedError]].
                StreamState::Errored(e) => ReadDispatch::Errored(e.clone()),
                // Otherwise, perform
                // ! stream.[[controller]].[[PullSteps]](readRequest).
                StreamState::Readable => match &inner.controller {
                    ControllerState::Default(_) => ReadDispatch::DefaultController,
                    ControllerState::Byte(_) => ReadDispatch::ByteController,
                },
            }
        };

        let rx = match dispatch {
            ReadDispatch::Closed => return Ok(None),
            ReadDispatch::Errored(e) => return Err(e),
            ReadDispatch::DefaultController => {
                let (request, rx) = ChannelReadRequest::new();
                default_controller_pull_steps(&self.stream, Box::new(request));
                rx
            },
            ReadDispatch::ByteController => {
                let (request, rx) = ChannelReadRequest::new();
                byte_controller_pull_steps(&self.stream, Box::new(request));
                rx
            },
        };

        rx.await
            .unwrap_or_else(|_| Err(WebError::type_error("The stream was destroyed")))
    }

    /// The closed promise: resolves on close, rejects on error or release.
    pub async fn closed(&self) -> WebResult<()> {
        self.closed.wait().await
    }

    /// cancel(reason) — cancels the underlying stream through the lock.
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

    /// releaseLock() — detaches the reader; pending reads are rejected.
    /// A second release is a no-op.
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

            // Reject reader.[[closedPromise]] with a TypeError exception.
            self.closed.reject(e.clone());

            // Perform ! stream.[[controller]].[[ReleaseSteps]]().
            byte_controller_release_steps(inner);

            let requests = match std::mem::replace(&mut inner.reader, ReaderState::None) {
                ReaderState::Default(reader) => reader.read_requests,
                _ => unreachable!("active default reader just verified"),
            };
            (requests, e)
        };

        // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e).
        let mut requests = requests;
        for request in requests.drain() {
            request.error_steps(e.clone());
        }
    }
}
