use std::rc::Weak;

use strato_exceptions::{WebError, WebResult};

use super::controller::{call_pull_if_needed, controller_error, desired_size};
use super::objects::{SharedStream, StreamInner, StreamState, ValueWithSize};
use super::reader::ReadRequest;
use super::stream::{
    readable_stream_close, readable_stream_fulfill_read_request,
};

/// Handle passed to a default underlying source; also obtainable for tests.
/// Weakly tied to its stream: operations on a dropped stream are no-ops.
pub struct ReadableStreamDefaultController<T: 'static> {
    stream: Weak<std::cell::RefCell<StreamInner<T>>>,
}

impl<T> Clone for ReadableStreamDefaultController<T> {
    fn clone(&self) -> Self {
        Self {
            stream: Weak::clone(&self.stream),
        }
    }
}

impl<T: 'static> ReadableStreamDefaultController<T> {
    pub(crate) fn new(stream: &SharedStream<T>) -> Self {
        Self {
            stream: std::rc::Rc::downgrade(stream),
        }
    }

    /// readonly attribute unrestricted double? desiredSize.
    pub fn desired_size(&self) -> Option<f64> {
        match self.stream.upgrade() {
            Some(stream) => desired_size(&stream.borrow()),
            None => None,
        }
    }

    /// undefined close().
    pub fn close(&self) -> WebResult<()> {
        let stream = match self.stream.upgrade() {
            Some(stream) => stream,
            None => return Ok(()),
        };
        // If ! ReadableStreamDefaultControllerCanCloseOrEnqueue(this) is
        // false, throw a TypeError exception.
        if !can_close_or_enqueue(&stream.borrow()) {
            return Err(WebError::type_error(
                "The stream is not in a state that permits close",
            ));
        }
        default_controller_close(&stream);
        Ok(())
    }

    /// undefined enqueue(optional any chunk).
    pub fn enqueue(&self, chunk: T) -> WebResult<()> {
        let stream = match self.stream.upgrade() {
            Some(stream) => stream,
            None => return Ok(()),
        };
        if !can_close_or_enqueue(&stream.borrow()) {
            return Err(WebError::type_error(
                "The stream is not in a state that permits enqueue",
            ));
        }
        default_controller_enqueue(&stream, chunk)
    }

    /// undefined error(optional any e).
    pub fn error(&self, e: WebError) {
        if let Some(stream) = self.stream.upgrade() {
            controller_error(&mut stream.borrow_mut(), e);
        }
    }
}

/// ReadableStreamDefaultControllerCanCloseOrEnqueue(controller).
pub(crate) fn can_close_or_enqueue<T>(inner: &StreamInner<T>) -> bool {
    // If controller.[[closeRequested]] is false and state is "readable",
    // return true. Otherwise, return false.
    matches!(inner.state, StreamState::Readable) && !inner.controller.close_requested()
}

/// ReadableStreamDefaultControllerClose(controller).
pub(crate) fn default_controller_close<T>(stream: &SharedStream<T>) {
    {
        let mut inner = stream.borrow_mut();
        if !can_close_or_enqueue(&inner) {
            return;
        }

        let controller = inner
            .controller
            .as_default_mut()
            .expect("close requires a default controller");

        // Set controller.[[closeRequested]] to true.
        controller.close_requested = true;

        // If controller.[[queue]] is empty,
        if controller.queue.is_empty() {
            // Perform ! ReadableStreamDefaultControllerClearAlgorithms(controller).
            controller.clear_algorithms();
            // Perform ! ReadableStreamClose(stream).
            readable_stream_close(&mut inner);
        }
    }
}

/// ReadableStreamDefaultControllerEnqueue(controller, chunk).
pub(crate) fn default_controller_enqueue<T: 'static>(
    stream: &SharedStream<T>,
    chunk: T,
) -> WebResult<()> {
    // If the stream is locked with pending read requests, fulfill the
    // oldest directly; otherwise run the size algorithm and buffer.
    let chunk_and_size = {
        let mut inner = stream.borrow_mut();
        if !can_close_or_enqueue(&inner) {
            return Ok(());
        }

        if inner.reader.num_read_requests() > 0 {
            // Perform ! ReadableStreamFulfillReadRequest(stream, chunk, false).
            readable_stream_fulfill_read_request(&mut inner, chunk, false);
            None
        } else {
            let size_algorithm = inner
                .controller
                .as_default_mut()
                .expect("enqueue requires a default controller")
                .size_algorithm
                .clone()
                .expect("size algorithm used after clear_algorithms");
            Some((chunk, size_algorithm))
        }
    };

    if let Some((chunk, size_algorithm)) = chunk_and_size {
        // Let result be the result of performing
        // controller.[[strategySizeAlgorithm]], passing in chunk.
        let size = size_algorithm(&chunk);

        // If ! IsNonNegativeNumber(size) is false, or size is +∞, this is a
        // RangeError; the controller is errored and the error rethrown.
        if size.is_nan() || size < 0.0 || size.is_infinite() {
            let e = WebError::range_error("Size must be a finite, non-NaN, non-negative number.");
            controller_error(&mut stream.borrow_mut(), e.clone());
            return Err(e);
        }

        let mut inner = stream.borrow_mut();
        let controller = inner
            .controller
            .as_default_mut()
            .expect("enqueue requires a default controller");
        // Append a new value-with-size to controller.[[queue]]; bump
        // [[queueTotalSize]].
        controller.queue.push_back(ValueWithSize { value: chunk, size });
        controller.queue_total_size += size;
    }

    // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(controller).
    call_pull_if_needed(stream);
    Ok(())
}

/// The default controller's [[PullSteps]](readRequest).
pub(crate) fn default_controller_pull_steps<T: 'static>(
    stream: &SharedStream<T>,
    read_request: Box<dyn ReadRequest<T>>,
) {
    let pull_needed = {
        let mut inner = stream.borrow_mut();
        let controller = inner
            .controller
            .as_default_mut()
            .expect("pull_steps requires a default controller");

        // If this.[[queue]] is not empty,
        if !controller.queue.is_empty() {
            // Let chunk be ! DequeueValue(this).
            let chunk = controller.dequeue_value();

            // If this.[[closeRequested]] is true and this.[[queue]] is empty,
            let closing = controller.close_requested && controller.queue.is_empty();
            if closing {
                // Perform ! ReadableStreamDefaultControllerClearAlgorithms(this).
                controller.clear_algorithms();
                // Perform ! ReadableStreamClose(stream).
                readable_stream_close(&mut inner);
            }

            // Perform readRequest's chunk steps, given chunk.
            read_request.chunk_steps(chunk);
            !closing
        } else {
            // Perform ! ReadableStreamAddReadRequest(stream, readRequest).
            inner
                .reader
                .as_default_mut()
                .expect("pull_steps requires a default reader")
                .read_requests
                .push(read_request);
            true
        }
    };

    if pull_needed {
        // Perform ! ReadableStreamDefaultControllerCallPullIfNeeded(this).
        call_pull_if_needed(stream);
    }
}
