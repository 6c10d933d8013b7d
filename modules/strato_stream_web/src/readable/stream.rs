use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
};

use futures_util::StreamExt;
use strato_exceptions::{WebError, WebResult};

use crate::queuing_strategy::QueuingStrategy;
use crate::utils::promise::{rejected, resolved, StreamFuture};

use super::byte_controller::ReadableByteStreamController;
use super::controller::{call_pull_if_needed, controller_error, take_cancel_steps};
use super::default_controller::ReadableStreamDefaultController;
use super::objects::{
    ByteControllerState, ByteView, ControllerState, DefaultControllerState, PullFn, ReaderState,
    SharedStream, StreamInner, StreamState,
};

/// A future returned by an underlying source's pull or cancel algorithm.
pub type SourceFuture = Pin<Box<dyn Future<Output = WebResult<()>>>>;

pub type StartAlgorithm<C> = Box<dyn FnOnce(C) -> WebResult<()>>;
pub type PullAlgorithm<C> = Box<dyn FnMut(C) -> SourceFuture>;
pub type CancelAlgorithm = Box<dyn FnOnce(Option<WebError>) -> SourceFuture>;

/// The underlying source of a default (value) stream.
///
/// `start` runs synchronously inside the constructor; an error transitions
/// the new stream to errored. `pull` is throttled to one outstanding
/// invocation; a rejected future errors the stream. `cancel` receives the
/// cancel reason.
pub struct UnderlyingSource<T: 'static> {
    pub start: Option<StartAlgorithm<ReadableStreamDefaultController<T>>>,
    pub pull: Option<PullAlgorithm<ReadableStreamDefaultController<T>>>,
    pub cancel: Option<CancelAlgorithm>,
}

impl<T> Default for UnderlyingSource<T> {
    fn default() -> Self {
        Self {
            start: None,
            pull: None,
            cancel: None,
        }
    }
}

impl<T> UnderlyingSource<T> {
    pub fn with_start(
        mut self,
        start: impl FnOnce(ReadableStreamDefaultController<T>) -> WebResult<()> + 'static,
    ) -> Self {
        self.start = Some(Box::new(start));
        self
    }

    pub fn with_pull(
        mut self,
        pull: impl FnMut(ReadableStreamDefaultController<T>) -> SourceFuture + 'static,
    ) -> Self {
        self.pull = Some(Box::new(pull));
        self
    }

    pub fn with_cancel(
        mut self,
        cancel: impl FnOnce(Option<WebError>) -> SourceFuture + 'static,
    ) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }
}

/// The underlying source of a byte stream. No size strategy exists here;
/// byte streams measure their queue in bytes.
pub struct UnderlyingByteSource {
    pub start: Option<StartAlgorithm<ReadableByteStreamController>>,
    pub pull: Option<PullAlgorithm<ReadableByteStreamController>>,
    pub cancel: Option<CancelAlgorithm>,
    pub auto_allocate_chunk_size: Option<usize>,
    pub high_water_mark: Option<f64>,
}

impl Default for UnderlyingByteSource {
    fn default() -> Self {
        Self {
            start: None,
            pull: None,
            cancel: None,
            auto_allocate_chunk_size: None,
            high_water_mark: None,
        }
    }
}

impl UnderlyingByteSource {
    pub fn with_start(
        mut self,
        start: impl FnOnce(ReadableByteStreamController) -> WebResult<()> + 'static,
    ) -> Self {
        self.start = Some(Box::new(start));
        self
    }

    pub fn with_pull(
        mut self,
        pull: impl FnMut(ReadableByteStreamController) -> SourceFuture + 'static,
    ) -> Self {
        self.pull = Some(Box::new(pull));
        self
    }

    pub fn with_cancel(
        mut self,
        cancel: impl FnOnce(Option<WebError>) -> SourceFuture + 'static,
    ) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }

    pub fn with_auto_allocate_chunk_size(mut self, size: usize) -> Self {
        self.auto_allocate_chunk_size = Some(size);
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: f64) -> Self {
        self.high_water_mark = Some(high_water_mark);
        self
    }
}

/// https://streams.spec.whatwg.org/#rs-class
pub struct ReadableStream<T: 'static> {
    pub(crate) inner: SharedStream<T>,
}

/// A stream of byte views, the only flavor a byte controller serves.
pub type ByteStream = ReadableStream<ByteView>;

impl<T> Clone for ReadableStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ReadableStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStream").finish_non_exhaustive()
    }
}

// https://streams.spec.whatwg.org/#validate-and-normalize-high-water-mark
fn extract_high_water_mark(high_water_mark: Option<f64>, default: f64) -> WebResult<f64> {
    match high_water_mark {
        None => Ok(default),
        Some(high_water_mark) => {
            // If highWaterMark is NaN or highWaterMark < 0, throw a RangeError exception.
            if high_water_mark.is_nan() || high_water_mark < 0.0 {
                return Err(WebError::range_error("Invalid highWaterMark"));
            }
            Ok(high_water_mark)
        },
    }
}

impl<T: 'static> ReadableStream<T> {
    /// Constructs a stream over a default controller.
    ///
    /// Errors thrown by `start` transition the stream to errored; an
    /// invalid high-water mark is a RangeError.
    pub fn new(source: UnderlyingSource<T>, strategy: QueuingStrategy<T>) -> WebResult<Self> {
        let high_water_mark = extract_high_water_mark(strategy.high_water_mark, 1.0)?;
        // Let sizeAlgorithm be ! ExtractSizeAlgorithm(strategy).
        let size_algorithm = strategy.size.unwrap_or_else(|| Rc::new(|_: &T| 1.0));
        let UnderlyingSource {
            start,
            pull,
            cancel,
        } = source;

        let inner = Rc::new(RefCell::new(StreamInner {
            // Set stream.[[state]] to "readable".
            state: StreamState::Readable,
            // Set stream.[[disturbed]] to false.
            disturbed: false,
            controller: ControllerState::Default(DefaultControllerState {
                queue: VecDeque::new(),
                queue_total_size: 0.0,
                started: false,
                close_requested: false,
                pulling: false,
                pull_again: false,
                strategy_hwm: high_water_mark,
                size_algorithm: Some(size_algorithm),
                pull_algorithm: None,
                cancel_algorithm: None,
            }),
            // Set stream.[[reader]] to undefined.
            reader: ReaderState::None,
        }));

        // The pull algorithm is stored as a zero-argument thunk over a weak
        // stream reference so scheduling stays chunk-type agnostic.
        let pull_algorithm: PullFn = match pull {
            Some(mut pull) => {
                let weak = Rc::downgrade(&inner);
                Box::new(move || match weak.upgrade() {
                    Some(stream) => pull(ReadableStreamDefaultController::new(&stream)),
                    None => resolved(),
                })
            },
            None => Box::new(resolved),
        };
        let cancel_algorithm: CancelAlgorithm = match cancel {
            Some(cancel) => cancel,
            None => Box::new(|_| resolved()),
        };
        {
            let mut borrow = inner.borrow_mut();
            let controller = borrow
                .controller
                .as_default_mut()
                .expect("controller was just constructed as default");
            controller.pull_algorithm = Some(Rc::new(RefCell::new(pull_algorithm)));
            controller.cancel_algorithm = Some(cancel_algorithm);
        }

        let stream = Self { inner };

        // Let startResult be the result of performing startAlgorithm. (This
        // might throw an exception.)
        if let Some(start) = start {
            if let Err(e) = start(ReadableStreamDefaultController::new(&stream.inner)) {
                controller_error(&mut stream.inner.borrow_mut(), e);
                return Ok(stream);
            }
        }

        // Set controller.[[started]] to true.
        stream.inner.borrow_mut().controller.set_started();
        // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
        call_pull_if_needed(&stream.inner);

        Ok(stream)
    }

    /// ReadableStream.from over a synchronous iterable.
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        let iterator = Rc::new(RefCell::new(Some(iterable.into_iter())));
        let source = UnderlyingSource::default()
            .with_pull({
                let iterator = Rc::clone(&iterator);
                move |controller: ReadableStreamDefaultController<T>| {
                    // Advance the iterator; exhaustion closes the stream.
                    let next = iterator.borrow_mut().as_mut().and_then(Iterator::next);
                    let result = match next {
                        Some(value) => controller.enqueue(value),
                        None => controller.close(),
                    };
                    match result {
                        Ok(()) => resolved(),
                        Err(e) => rejected(e),
                    }
                }
            })
            .with_cancel({
                let iterator = Rc::clone(&iterator);
                move |_reason| {
                    // The iterator's return step: drop it.
                    iterator.borrow_mut().take();
                    resolved()
                }
            });

        Self::new(source, QueuingStrategy::default())
            .expect("default strategy never fails validation")
    }

    /// ReadableStream.from over an async iterable.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = WebResult<T>> + 'static,
    {
        let stream = Rc::new(RefCell::new(Some(Box::pin(stream))));
        let canceled = Rc::new(std::cell::Cell::new(false));
        let source = UnderlyingSource::default()
            .with_pull({
                let stream = Rc::clone(&stream);
                let canceled = Rc::clone(&canceled);
                move |controller: ReadableStreamDefaultController<T>| {
                    let stream = Rc::clone(&stream);
                    let canceled = Rc::clone(&canceled);
                    Box::pin(async move {
                        // Take the inner stream out of the cell; the borrow
                        // must not be held across the await.
                        let mut taken = stream.borrow_mut().take();
                        let next = match taken.as_mut() {
                            Some(inner) => inner.next().await,
                            None => None,
                        };
                        if !canceled.get() {
                            *stream.borrow_mut() = taken;
                        }
                        match next {
                            Some(Ok(value)) => controller.enqueue(value),
                            Some(Err(e)) => Err(e),
                            None => controller.close(),
                        }
                    })
                }
            })
            .with_cancel({
                let stream = Rc::clone(&stream);
                move |_reason| {
                    canceled.set(true);
                    stream.borrow_mut().take();
                    resolved()
                }
            });

        Self::new(source, QueuingStrategy::default())
            .expect("default strategy never fails validation")
    }

    /// Whether a reader is attached. `locked(S) ⇔ reader(S) ≠ none`.
    pub fn locked(&self) -> bool {
        !self.inner.borrow().reader.is_none()
    }

    /// Whether any read has touched the stream.
    pub fn is_disturbed(&self) -> bool {
        self.inner.borrow().disturbed
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.inner.borrow().state, StreamState::Errored(_))
    }

    /// Cancels the stream. A locked stream cannot be canceled here; cancel
    /// through its reader instead.
    pub fn cancel(&self, reason: Option<WebError>) -> impl Future<Output = WebResult<()>> {
        let fut: StreamFuture = if self.locked() {
            // If ! IsReadableStreamLocked(this) is true, return a promise
            // rejected with a TypeError exception.
            rejected(WebError::type_error(
                "Cannot cancel a stream that is locked to a reader",
            ))
        } else {
            readable_stream_cancel(&self.inner, reason)
        };
        async move { fut.await }
    }
}

impl ByteStream {
    /// Constructs a stream over a byte controller, the `type: "bytes"` path.
    pub fn bytes(source: UnderlyingByteSource) -> WebResult<Self> {
        let UnderlyingByteSource {
            start,
            pull,
            cancel,
            auto_allocate_chunk_size,
            high_water_mark,
        } = source;

        // If autoAllocateChunkSize is 0, then throw a TypeError exception.
        if auto_allocate_chunk_size == Some(0) {
            return Err(WebError::type_error(
                "autoAllocateChunkSize must be greater than 0",
            ));
        }
        let high_water_mark = extract_high_water_mark(high_water_mark, 0.0)?;

        let inner = Rc::new(RefCell::new(StreamInner {
            state: StreamState::Readable,
            disturbed: false,
            controller: ControllerState::Byte(ByteControllerState {
                queue: VecDeque::new(),
                queue_total_size: 0,
                started: false,
                close_requested: false,
                pulling: false,
                pull_again: false,
                strategy_hwm: high_water_mark,
                auto_allocate_chunk_size,
                pending_pull_intos: VecDeque::new(),
                byob_request_generation: 0,
                pull_algorithm: None,
                cancel_algorithm: None,
                make_chunk: std::convert::identity,
            }),
            reader: ReaderState::None,
        }));

        let pull_algorithm: PullFn = match pull {
            Some(mut pull) => {
                let weak = Rc::downgrade(&inner);
                Box::new(move || match weak.upgrade() {
                    Some(stream) => pull(ReadableByteStreamController::new(&stream)),
                    None => resolved(),
                })
            },
            None => Box::new(resolved),
        };
        let cancel_algorithm: CancelAlgorithm = match cancel {
            Some(cancel) => cancel,
            None => Box::new(|_| resolved()),
        };
        {
            let mut borrow = inner.borrow_mut();
            let controller = borrow
                .controller
                .as_byte_mut()
                .expect("controller was just constructed as byte");
            controller.pull_algorithm = Some(Rc::new(RefCell::new(pull_algorithm)));
            controller.cancel_algorithm = Some(cancel_algorithm);
        }

        let stream = Self { inner };

        if let Some(start) = start {
            if let Err(e) = start(ReadableByteStreamController::new(&stream.inner)) {
                controller_error(&mut stream.inner.borrow_mut(), e);
                return Ok(stream);
            }
        }

        stream.inner.borrow_mut().controller.set_started();
        call_pull_if_needed(&stream.inner);

        Ok(stream)
    }
}

/// ReadableStreamError(stream, e).
pub(crate) fn readable_stream_error<T>(inner: &mut StreamInner<T>, e: WebError) {
    // Set stream.[[state]] to "errored" and stream.[[storedError]] to e.
    inner.state = StreamState::Errored(e.clone());

    match &mut inner.reader {
        // If reader is undefined, return.
        ReaderState::None => {},
        ReaderState::Default(reader) => {
            // Reject reader.[[closedPromise]] with e.
            reader.closed.reject(e.clone());
            // Perform ! ReadableStreamDefaultReaderErrorReadRequests(reader, e).
            let requests: Vec<_> = reader.read_requests.drain().collect();
            for request in requests {
                request.error_steps(e.clone());
            }
        },
        ReaderState::Byob(reader) => {
            reader.closed.reject(e.clone());
            // Perform ! ReadableStreamBYOBReaderErrorReadIntoRequests(reader, e).
            let requests: Vec<_> = reader.read_into_requests.drain().collect();
            for request in requests {
                request.error_steps(e.clone());
            }
        },
    }
}

/// ReadableStreamClose(stream).
pub(crate) fn readable_stream_close<T>(inner: &mut StreamInner<T>) {
    // Set stream.[[state]] to "closed".
    inner.state = StreamState::Closed;

    // Resolve reader.[[closedPromise]] with undefined.
    if let Some(closed) = inner.reader.closed() {
        closed.resolve();
    }

    // If reader implements ReadableStreamDefaultReader, perform each read
    // request's close steps.
    if let ReaderState::Default(reader) = &mut inner.reader {
        let requests: Vec<_> = reader.read_requests.drain().collect();
        for request in requests {
            request.close_steps();
        }
    }
}

/// ReadableStreamFulfillReadRequest(stream, chunk, done).
pub(crate) fn readable_stream_fulfill_read_request<T>(
    inner: &mut StreamInner<T>,
    chunk: T,
    done: bool,
) {
    let reader = inner
        .reader
        .as_default_mut()
        .expect("fulfill_read_request requires a default reader");
    let request = reader
        .read_requests
        .shift()
        .expect("fulfill_read_request requires a pending read request");
    if done {
        request.close_steps();
    } else {
        request.chunk_steps(chunk);
    }
}

/// ReadableStreamFulfillReadIntoRequest(stream, chunk, done).
pub(crate) fn readable_stream_fulfill_read_into_request<T>(
    inner: &mut StreamInner<T>,
    chunk: ByteView,
    done: bool,
) {
    let reader = inner
        .reader
        .as_byob_mut()
        .expect("fulfill_read_into_request requires a BYOB reader");
    let request = reader
        .read_into_requests
        .shift()
        .expect("fulfill_read_into_request requires a pending read-into request");
    if done {
        request.close_steps(Some(chunk));
    } else {
        request.chunk_steps(chunk);
    }
}

/// ReadableStreamCancel(stream, reason).
pub(crate) fn readable_stream_cancel<T>(
    stream: &SharedStream<T>,
    reason: Option<WebError>,
) -> StreamFuture {
    let cancel_steps = {
        let mut inner = stream.borrow_mut();

        // Set stream.[[disturbed]] to true.
        inner.disturbed = true;

        match &inner.state {
            // If stream.[[state]] is "closed", return a promise resolved
            // with undefined.
            StreamState::Closed => return resolved(),
            // If stream.[[state]] is "errored", return a promise rejected
            // with stream.[[storedError]].
            StreamState::Errored(e) => return rejected(e.clone()),
            StreamState::Readable => {},
        }

        // Perform ! ReadableStreamClose(stream).
        readable_stream_close(&mut inner);

        // If reader is a BYOB reader, perform each read-into request's
        // close steps, given undefined.
        if let ReaderState::Byob(reader) = &mut inner.reader {
            let requests: Vec<_> = reader.read_into_requests.drain().collect();
            for request in requests {
                request.close_steps(None);
            }
        }

        // Let sourceCancelPromise be ! stream.[[controller]].[[CancelSteps]](reason).
        take_cancel_steps(&mut inner, reason)
    };

    // Run the cancel algorithm with no borrow held; its settlement is the
    // caller's promise.
    let fut = cancel_steps();
    Box::pin(async move { fut.await })
}
