use std::rc::Weak;

use strato_exceptions::{WebError, WebResult};

use super::controller::{call_pull_if_needed, controller_error, desired_size};
use super::objects::{
    ByteControllerState, ByteQueueEntry, ByteView, ControllerState, PullIntoDescriptor,
    ReaderKind, ReaderType, SharedStream, StreamInner, StreamState,
};
use super::reader::{ReadIntoRequest, ReadRequest};
use super::stream::{
    readable_stream_close, readable_stream_fulfill_read_into_request,
    readable_stream_fulfill_read_request,
};

/// Handle passed to a byte underlying source. Weakly tied to its stream:
/// operations on a dropped stream are no-ops.
pub struct ReadableByteStreamController {
    stream: Weak<std::cell::RefCell<StreamInner<ByteView>>>,
}

impl Clone for ReadableByteStreamController {
    fn clone(&self) -> Self {
        Self {
            stream: Weak::clone(&self.stream),
        }
    }
}

impl ReadableByteStreamController {
    pub(crate) fn new(stream: &SharedStream<ByteView>) -> Self {
        Self {
            stream: std::rc::Rc::downgrade(stream),
        }
    }

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
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        // If this.[[closeRequested]] is true, or the stream is no longer
        // readable, throw a TypeError exception.
        if inner.controller.close_requested() || !matches!(inner.state, StreamState::Readable) {
            return Err(WebError::type_error(
                "The stream is not in a state that permits close",
            ));
        }

        byte_controller_close(inner)
    }

    /// undefined enqueue(ArrayBufferView chunk).
    pub fn enqueue(&self, chunk: ByteView) -> WebResult<()> {
        let stream = match self.stream.upgrade() {
            Some(stream) => stream,
            None => return Ok(()),
        };

        {
            let inner = stream.borrow();
            // If chunk.[[ByteLength]] is 0, throw a TypeError exception.
            if chunk.byte_length() == 0 {
                return Err(WebError::type_error("chunk must have non-zero byteLength"));
            }
            // If chunk.[[ViewedArrayBuffer]].[[ArrayBufferByteLength]] is 0,
            // throw a TypeError exception.
            if chunk.buffer_byte_length() == 0 {
                return Err(WebError::type_error(
                    "chunk's buffer must have non-zero byteLength",
                ));
            }
            if inner.controller.close_requested() {
                return Err(WebError::type_error("stream is closed or draining"));
            }
            if !matches!(inner.state, StreamState::Readable) {
                return Err(WebError::type_error(
                    "The stream is not in the readable state and cannot be enqueued to",
                ));
            }
        }

        byte_controller_enqueue(&stream, chunk)
    }

    /// undefined error(optional any e).
    pub fn error(&self, e: WebError) {
        if let Some(stream) = self.stream.upgrade() {
            controller_error(&mut stream.borrow_mut(), e);
        }
    }

    /// readonly attribute ReadableStreamBYOBRequest? byobRequest.
    ///
    /// Present while a pull-into descriptor is pending; the handle goes
    /// stale as soon as that descriptor advances.
    pub fn byob_request(&self) -> Option<ByobRequest> {
        let stream = self.stream.upgrade()?;
        let inner = stream.borrow();
        let controller = inner.controller.as_byte()?;
        if controller.pending_pull_intos.is_empty() {
            return None;
        }
        Some(ByobRequest {
            stream: Weak::clone(&self.stream),
            generation: controller.byob_request_generation,
        })
    }
}

/// Producer-side handle over the first pending pull-into descriptor.
pub struct ByobRequest {
    stream: Weak<std::cell::RefCell<StreamInner<ByteView>>>,
    generation: u64,
}

impl ByobRequest {
    fn stream(&self) -> WebResult<SharedStream<ByteView>> {
        let stream = self
            .stream
            .upgrade()
            .ok_or_else(|| WebError::type_error("This BYOB request has been invalidated"))?;
        {
            let inner = stream.borrow();
            let valid = inner
                .controller
                .as_byte()
                .map(|c| {
                    !c.pending_pull_intos.is_empty()
                        && c.byob_request_generation == self.generation
                })
                .unwrap_or(false);
            if !valid {
                return Err(WebError::type_error(
                    "This BYOB request has been invalidated",
                ));
            }
        }
        Ok(stream)
    }

    /// Remaining writable length of the exposed view.
    pub fn view_len(&self) -> WebResult<usize> {
        let stream = self.stream()?;
        let inner = stream.borrow();
        let first = &inner
            .controller
            .as_byte()
            .expect("BYOB request requires a byte controller")
            .pending_pull_intos[0];
        Ok(first.byte_length - first.bytes_filled)
    }

    /// Writes into the unfilled region of the exposed view. Pair with
    /// `respond` to tell the stream how many bytes were produced.
    pub fn write_into(&self, f: impl FnOnce(&mut [u8])) -> WebResult<()> {
        let stream = self.stream()?;
        let mut guard = stream.borrow_mut();
        let first = &mut guard
            .controller
            .as_byte_mut()
            .expect("BYOB request requires a byte controller")
            .pending_pull_intos[0];
        let start = first.byte_offset + first.bytes_filled;
        let end = first.byte_offset + first.byte_length;
        f(&mut first.buffer[start..end]);
        Ok(())
    }

    /// undefined respond(unsigned long long bytesWritten).
    pub fn respond(&self, bytes_written: usize) -> WebResult<()> {
        let stream = self.stream()?;
        byte_controller_respond(&stream, bytes_written)
    }

    /// undefined respondWithNewView(ArrayBufferView view).
    pub fn respond_with_new_view(&self, view: ByteView) -> WebResult<()> {
        let stream = self.stream()?;
        byte_controller_respond_with_new_view(&stream, view)
    }
}

/// ReadableByteStreamControllerClose(controller). The caller has verified
/// the stream is readable and not yet draining.
pub(crate) fn byte_controller_close<T>(inner: &mut StreamInner<T>) -> WebResult<()> {
    let controller = inner
        .controller
        .as_byte_mut()
        .expect("close requires a byte controller");

    // If controller.[[queueTotalSize]] > 0, set
    // controller.[[closeRequested]] to true and return.
    if controller.queue_total_size > 0 {
        controller.close_requested = true;
        return Ok(());
    }

    // If the first pending descriptor's filled bytes do not line up with
    // its element size, error the stream and throw.
    if let Some(first) = controller.pending_pull_intos.front() {
        if first.bytes_filled % first.element_size != 0 {
            let e = WebError::type_error("Insufficient bytes to fill elements in the given buffer");
            controller_error(inner, e.clone());
            return Err(e);
        }
    }

    // Perform ! ReadableByteStreamControllerClearAlgorithms(controller).
    controller.clear_algorithms();
    // Perform ! ReadableStreamClose(stream).
    readable_stream_close(inner);
    Ok(())
}

fn enqueue_chunk_to_queue<T>(
    controller: &mut ByteControllerState<T>,
    buffer: Vec<u8>,
    byte_offset: usize,
    byte_length: usize,
) {
    controller.queue.push_back(ByteQueueEntry {
        buffer,
        byte_offset,
        byte_length,
    });
    controller.queue_total_size += byte_length;
}

/// ReadableByteStreamControllerEnqueueClonedChunkToQueue.
fn enqueue_cloned_chunk<T>(
    controller: &mut ByteControllerState<T>,
    buffer: &[u8],
    byte_offset: usize,
    byte_length: usize,
) {
    let clone = buffer[byte_offset..byte_offset + byte_length].to_vec();
    enqueue_chunk_to_queue(controller, clone, 0, byte_length);
}

/// ReadableByteStreamControllerEnqueueDetachedPullIntoToQueue: the first
/// descriptor lost its reader; its filled bytes move to the queue so BYOB
/// buffers never carry data for a vanished consumer.
fn enqueue_detached_pull_into<T>(controller: &mut ByteControllerState<T>) {
    let descriptor = controller
        .pending_pull_intos
        .pop_front()
        .expect("detached pull-into requires a pending descriptor");
    if descriptor.bytes_filled > 0 {
        enqueue_cloned_chunk(
            controller,
            &descriptor.buffer,
            descriptor.byte_offset,
            descriptor.bytes_filled,
        );
    }
}

/// ReadableByteStreamControllerConvertPullIntoDescriptor.
fn convert_pull_into_descriptor(descriptor: PullIntoDescriptor) -> ByteView {
    // Assert: bytesFilled ≤ byteLength and bytesFilled mod elementSize is 0.
    ByteView::with_layout(
        descriptor.buffer,
        descriptor.byte_offset,
        descriptor.bytes_filled,
        descriptor.element_size,
    )
    .expect("committed descriptor is aligned by construction")
}

/// ReadableByteStreamControllerCommitPullIntoDescriptor.
fn commit_pull_into_descriptor<T>(inner: &mut StreamInner<T>, descriptor: PullIntoDescriptor) {
    // Assert: stream.[[state]] is not "errored".
    let done = matches!(inner.state, StreamState::Closed);
    let reader_type = descriptor.reader_type;
    let make_chunk = inner
        .controller
        .as_byte()
        .expect("commit requires a byte controller")
        .make_chunk;

    let filled_view = convert_pull_into_descriptor(descriptor);

    match reader_type {
        ReaderType::Default => {
            readable_stream_fulfill_read_request(inner, (make_chunk)(filled_view), done)
        },
        ReaderType::Byob => readable_stream_fulfill_read_into_request(inner, filled_view, done),
        ReaderType::None => unreachable!("descriptors without a reader are never committed"),
    }
}

/// ReadableByteStreamControllerFillPullIntoDescriptorFromQueue. Returns
/// whether the descriptor became ready to commit.
fn fill_pull_into_descriptor_from_queue<T>(
    controller: &mut ByteControllerState<T>,
    descriptor: &mut PullIntoDescriptor,
) -> bool {
    let max_bytes_to_copy = std::cmp::min(
        controller.queue_total_size,
        descriptor.byte_length - descriptor.bytes_filled,
    );
    let max_bytes_filled = descriptor.bytes_filled + max_bytes_to_copy;
    let mut total_bytes_to_copy_remaining = max_bytes_to_copy;
    let mut ready = false;

    // Let maxAlignedBytes be maxBytesFilled − (maxBytesFilled mod elementSize).
    let max_aligned_bytes = max_bytes_filled - (max_bytes_filled % descriptor.element_size);
    // If maxAlignedBytes ≥ pullIntoDescriptor's minimum fill, the
    // descriptor can be committed this round; copy only aligned bytes.
    if max_aligned_bytes >= descriptor.minimum_fill {
        total_bytes_to_copy_remaining = max_aligned_bytes - descriptor.bytes_filled;
        ready = true;
    }

    while total_bytes_to_copy_remaining > 0 {
        let mut consumed = false;
        let bytes_to_copy = {
            let head = controller
                .queue
                .front_mut()
                .expect("queue drained while bytes remain to copy");
            let bytes_to_copy = std::cmp::min(total_bytes_to_copy_remaining, head.byte_length);

            // Copy the bytes from headOfQueue into the descriptor's buffer.
            let dest_start = descriptor.byte_offset + descriptor.bytes_filled;
            descriptor.buffer[dest_start..dest_start + bytes_to_copy].copy_from_slice(
                &head.buffer[head.byte_offset..head.byte_offset + bytes_to_copy],
            );

            if head.byte_length == bytes_to_copy {
                consumed = true;
            } else {
                head.byte_offset += bytes_to_copy;
                head.byte_length -= bytes_to_copy;
            }
            bytes_to_copy
        };
        if consumed {
            controller.queue.pop_front();
        }
        controller.queue_total_size -= bytes_to_copy;
        descriptor.bytes_filled += bytes_to_copy;
        total_bytes_to_copy_remaining -= bytes_to_copy;
    }

    ready
}

/// The closing half of ReadableByteStreamControllerHandleQueueDrain; every
/// caller follows up with call_pull_if_needed, which is a no-op once the
/// stream closed.
fn handle_queue_drain<T>(inner: &mut StreamInner<T>) {
    let controller = inner
        .controller
        .as_byte_mut()
        .expect("queue drain requires a byte controller");
    if controller.queue_total_size == 0 && controller.close_requested {
        controller.clear_algorithms();
        readable_stream_close(inner);
    }
}

/// ReadableByteStreamControllerProcessPullIntoDescriptorsUsingQueue.
fn process_pull_into_descriptors_using_queue<T>(inner: &mut StreamInner<T>) {
    loop {
        let descriptor = {
            let controller = inner
                .controller
                .as_byte_mut()
                .expect("descriptor processing requires a byte controller");

            if controller.pending_pull_intos.is_empty() || controller.queue_total_size == 0 {
                return;
            }

            // Let pullIntoDescriptor be controller.[[pendingPullIntos]][0],
            // lifted out so the queue can drain into it.
            let mut descriptor = controller.pending_pull_intos.pop_front().unwrap();
            if fill_pull_into_descriptor_from_queue(controller, &mut descriptor) {
                // Perform ! ReadableByteStreamControllerShiftPendingPullInto.
                controller.invalidate_byob_request();
                descriptor
            } else {
                controller.pending_pull_intos.push_front(descriptor);
                return;
            }
        };

        // Perform ! ReadableByteStreamControllerCommitPullIntoDescriptor.
        commit_pull_into_descriptor(inner, descriptor);
    }
}

/// ReadableByteStreamControllerFillReadRequestFromQueue.
fn fill_read_request_from_queue<T>(
    inner: &mut StreamInner<T>,
    read_request: Box<dyn ReadRequest<T>>,
) {
    let (view, make_chunk) = {
        let controller = inner
            .controller
            .as_byte_mut()
            .expect("read-request fill requires a byte controller");
        // Assert: controller.[[queueTotalSize]] > 0.
        let entry = controller
            .queue
            .pop_front()
            .expect("read-request fill requires a non-empty queue");
        controller.queue_total_size -= entry.byte_length;

        let view = ByteView::with_layout(entry.buffer, entry.byte_offset, entry.byte_length, 1)
            .expect("queue entries are valid views");
        (view, controller.make_chunk)
    };

    // Perform ! ReadableByteStreamControllerHandleQueueDrain(controller).
    handle_queue_drain(inner);

    // Perform readRequest's chunk steps, given view.
    read_request.chunk_steps((make_chunk)(view));
}

/// ReadableByteStreamControllerProcessReadRequestsUsingQueue.
fn process_read_requests_using_queue<T>(inner: &mut StreamInner<T>) {
    loop {
        let has_bytes = inner
            .controller
            .as_byte()
            .map(|c| c.queue_total_size > 0)
            .unwrap_or(false);
        if !has_bytes || inner.reader.num_read_requests() == 0 {
            return;
        }
        let read_request = inner
            .reader
            .as_default_mut()
            .expect("read-request processing requires a default reader")
            .read_requests
            .shift()
            .unwrap();
        fill_read_request_from_queue(inner, read_request);
    }
}

/// ReadableByteStreamControllerEnqueue(controller, chunk).
pub(crate) fn byte_controller_enqueue<T: 'static>(
    stream: &SharedStream<T>,
    chunk: ByteView,
) -> WebResult<()> {
    {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        // Transferring the chunk is the move of its parts; the producer's
        // view is gone.
        let (buffer, byte_offset, byte_length, _) = chunk.into_parts();

        {
            let controller = inner
                .controller
                .as_byte_mut()
                .expect("enqueue requires a byte controller");

            // If controller.[[pendingPullIntos]] is not empty,
            if !controller.pending_pull_intos.is_empty() {
                // Perform ! ReadableByteStreamControllerInvalidateBYOBRequest.
                controller.invalidate_byob_request();
                // If the first descriptor's reader type is "none", its
                // filled bytes move to the queue ahead of the new chunk.
                if controller.pending_pull_intos[0].reader_type == ReaderType::None {
                    enqueue_detached_pull_into(controller);
                }
            }
        }

        match inner.reader.kind() {
            // If ! ReadableStreamHasDefaultReader(stream) is true,
            ReaderKind::Default => {
                // Perform ! ReadableByteStreamControllerProcessReadRequestsUsingQueue.
                process_read_requests_using_queue(inner);

                if inner.reader.num_read_requests() > 0 {
                    // Assert: controller.[[queue]] is empty.
                    let make_chunk = inner
                        .controller
                        .as_byte()
                        .expect("enqueue requires a byte controller")
                        .make_chunk;
                    let view = ByteView::with_layout(buffer, byte_offset, byte_length, 1)
                        .expect("transferred chunks are valid views");
                    // Perform ! ReadableStreamFulfillReadRequest(stream, transferredView, false).
                    readable_stream_fulfill_read_request(inner, (make_chunk)(view), false);
                } else {
                    // Perform ! ReadableByteStreamControllerEnqueueChunkToQueue.
                    let controller = inner.controller.as_byte_mut().unwrap();
                    enqueue_chunk_to_queue(controller, buffer, byte_offset, byte_length);
                }
            },
            // Otherwise, if ! ReadableStreamHasBYOBReader(stream) is true,
            ReaderKind::Byob => {
                // Perform ! ReadableByteStreamControllerEnqueueChunkToQueue.
                let controller = inner.controller.as_byte_mut().unwrap();
                enqueue_chunk_to_queue(controller, buffer, byte_offset, byte_length);
                // Perform ! ReadableByteStreamControllerProcessPullIntoDescriptorsUsingQueue.
                process_pull_into_descriptors_using_queue(inner);
            },
            // Otherwise, the stream is not locked.
            ReaderKind::None => {
                let controller = inner.controller.as_byte_mut().unwrap();
                enqueue_chunk_to_queue(controller, buffer, byte_offset, byte_length);
            },
        }
    }

    // Perform ! ReadableByteStreamControllerCallPullIfNeeded(controller).
    call_pull_if_needed(stream);
    Ok(())
}

/// The byte controller's [[PullSteps]](readRequest).
pub(crate) fn byte_controller_pull_steps<T: 'static>(
    stream: &SharedStream<T>,
    read_request: Box<dyn ReadRequest<T>>,
) {
    {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        let (has_bytes, auto_allocate_chunk_size) = {
            let controller = inner
                .controller
                .as_byte()
                .expect("pull_steps requires a byte controller");
            (
                controller.queue_total_size > 0,
                controller.auto_allocate_chunk_size,
            )
        };

        // If this.[[queueTotalSize]] > 0, fill the request straight from
        // the queue; there are no queued read requests in that case.
        if has_bytes {
            fill_read_request_from_queue(inner, read_request);
        } else {
            // If autoAllocateChunkSize is not undefined, pull into a fresh
            // buffer on the consumer's behalf.
            if let Some(auto_allocate_chunk_size) = auto_allocate_chunk_size {
                let controller = inner.controller.as_byte_mut().unwrap();
                controller.pending_pull_intos.push_back(PullIntoDescriptor {
                    buffer: vec![0; auto_allocate_chunk_size],
                    buffer_byte_length: auto_allocate_chunk_size,
                    byte_offset: 0,
                    byte_length: auto_allocate_chunk_size,
                    bytes_filled: 0,
                    minimum_fill: 1,
                    element_size: 1,
                    reader_type: ReaderType::Default,
                });
            }

            // Perform ! ReadableStreamAddReadRequest(stream, readRequest).
            inner
                .reader
                .as_default_mut()
                .expect("pull_steps requires a default reader")
                .read_requests
                .push(read_request);
        }
    }

    call_pull_if_needed(stream);
}

/// ReadableByteStreamControllerPullInto(controller, view, min, readIntoRequest).
pub(crate) fn byte_controller_pull_into<T: 'static>(
    stream: &SharedStream<T>,
    view: ByteView,
    min_elements: usize,
    read_into_request: Box<dyn ReadIntoRequest>,
) {
    let pull_needed = {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        let element_size = view.element_size();
        // Let minimumFill be min × elementSize.
        let minimum_fill = min_elements * element_size;
        let (buffer, byte_offset, byte_length, _) = view.into_parts();
        let buffer_byte_length = buffer.len();

        let mut descriptor = PullIntoDescriptor {
            buffer,
            buffer_byte_length,
            byte_offset,
            byte_length,
            bytes_filled: 0,
            minimum_fill,
            element_size,
            reader_type: ReaderType::Byob,
        };

        let head_busy = {
            let controller = inner
                .controller
                .as_byte()
                .expect("pull_into requires a byte controller");
            !controller.pending_pull_intos.is_empty()
        };

        // If controller.[[pendingPullIntos]] is not empty, append and wait;
        // the descriptor at the head drives progress.
        if head_busy {
            let controller = inner.controller.as_byte_mut().unwrap();
            controller.pending_pull_intos.push_back(descriptor);
            inner
                .reader
                .as_byob_mut()
                .expect("pull_into requires a BYOB reader")
                .read_into_requests
                .push(read_into_request);
            false
        } else if matches!(inner.state, StreamState::Closed) {
            // If stream.[[state]] is "closed", respond with an empty view
            // over the caller's buffer.
            let empty_view =
                ByteView::with_layout(descriptor.buffer, descriptor.byte_offset, 0, element_size)
                    .expect("zero-length views are always in bounds");
            read_into_request.close_steps(Some(empty_view));
            false
        } else {
            let mut outcome = None;
            {
                let controller = inner.controller.as_byte_mut().unwrap();
                // If controller.[[queueTotalSize]] > 0, fill opportunistically.
                if controller.queue_total_size > 0 {
                    if fill_pull_into_descriptor_from_queue(controller, &mut descriptor) {
                        outcome = Some(true);
                    } else if controller.close_requested {
                        outcome = Some(false);
                    }
                }
            }

            match outcome {
                Some(true) => {
                    // Ready at once: commit to the caller and drain-close if
                    // this emptied a draining queue.
                    let filled_view = convert_pull_into_descriptor(descriptor);
                    handle_queue_drain(inner);
                    read_into_request.chunk_steps(filled_view);
                    true
                },
                Some(false) => {
                    // Draining with too few bytes left: the read can never
                    // complete.
                    let e = WebError::type_error(
                        "Insufficient bytes to fill elements in the given buffer",
                    );
                    controller_error(inner, e.clone());
                    read_into_request.error_steps(e);
                    false
                },
                None => {
                    let controller = inner.controller.as_byte_mut().unwrap();
                    controller.pending_pull_intos.push_back(descriptor);
                    inner
                        .reader
                        .as_byob_mut()
                        .expect("pull_into requires a BYOB reader")
                        .read_into_requests
                        .push(read_into_request);
                    true
                },
            }
        }
    };

    if pull_needed {
        call_pull_if_needed(stream);
    }
}

/// ReadableByteStreamControllerRespond(controller, bytesWritten).
pub(crate) fn byte_controller_respond<T: 'static>(
    stream: &SharedStream<T>,
    bytes_written: usize,
) -> WebResult<()> {
    {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;
        {
            let controller = inner
                .controller
                .as_byte()
                .expect("respond requires a byte controller");
            // Assert: controller.[[pendingPullIntos]] is not empty.
            let first = controller
                .pending_pull_intos
                .front()
                .ok_or_else(|| WebError::type_error("This BYOB request has been invalidated"))?;

            match &inner.state {
                StreamState::Closed => {
                    // If bytesWritten is not 0, throw a TypeError exception.
                    if bytes_written != 0 {
                        return Err(WebError::type_error(
                            "bytesWritten must be 0 when calling respond() on a closed stream",
                        ));
                    }
                },
                StreamState::Readable => {
                    // If bytesWritten is 0, throw a TypeError exception.
                    if bytes_written == 0 {
                        return Err(WebError::type_error(
                            "bytesWritten must be greater than 0 when calling respond() on a readable stream",
                        ));
                    }
                    // If bytesFilled + bytesWritten > byteLength, throw a
                    // RangeError exception.
                    if first.bytes_filled + bytes_written > first.byte_length {
                        return Err(WebError::range_error("bytesWritten out of range"));
                    }
                },
                StreamState::Errored(e) => return Err(e.clone()),
            }
        }

        respond_internal(inner, bytes_written);
    }

    call_pull_if_needed(stream);
    Ok(())
}

/// ReadableByteStreamControllerRespondWithNewView(controller, view).
pub(crate) fn byte_controller_respond_with_new_view<T: 'static>(
    stream: &SharedStream<T>,
    view: ByteView,
) -> WebResult<()> {
    {
        let mut guard = stream.borrow_mut();
        let inner = &mut *guard;

        let state_closed = match &inner.state {
            StreamState::Closed => true,
            StreamState::Readable => false,
            StreamState::Errored(e) => return Err(e.clone()),
        };

        let controller = inner
            .controller
            .as_byte_mut()
            .expect("respond requires a byte controller");
        let first = controller
            .pending_pull_intos
            .front_mut()
            .ok_or_else(|| WebError::type_error("This BYOB request has been invalidated"))?;

        if state_closed {
            // If view.[[ByteLength]] is not 0, throw a TypeError exception.
            if view.byte_length() != 0 {
                return Err(WebError::type_error(
                    "The view's length must be 0 when calling respondWithNewView() on a closed stream",
                ));
            }
        } else if view.byte_length() == 0 {
            return Err(WebError::type_error(
                "The view's length must be greater than 0 when calling respondWithNewView() on a readable stream",
            ));
        }

        // If firstDescriptor's byte offset + bytes filled is not
        // view.[[ByteOffset]], throw a RangeError exception.
        if first.byte_offset + first.bytes_filled != view.byte_offset() {
            return Err(WebError::range_error(
                "The region specified by view does not match byobRequest",
            ));
        }
        // If firstDescriptor's buffer byte length is not the view's buffer
        // byte length, throw a RangeError exception.
        if first.buffer_byte_length != view.buffer_byte_length() {
            return Err(WebError::range_error(
                "The buffer of view has different capacity than byobRequest",
            ));
        }
        // If bytesFilled + view.[[ByteLength]] > byteLength, throw a
        // RangeError exception.
        if first.bytes_filled + view.byte_length() > first.byte_length {
            return Err(WebError::range_error(
                "The region specified by view is larger than byobRequest",
            ));
        }

        // Set firstDescriptor's buffer to ! TransferArrayBuffer(view.[[ViewedArrayBuffer]]).
        let view_byte_length = view.byte_length();
        first.buffer = view.into_buffer();

        respond_internal(inner, view_byte_length);
    }

    call_pull_if_needed(stream);
    Ok(())
}

/// ReadableByteStreamControllerRespondInternal.
fn respond_internal<T: 'static>(inner: &mut StreamInner<T>, bytes_written: usize) {
    {
        let controller = inner
            .controller
            .as_byte_mut()
            .expect("respond requires a byte controller");
        // Perform ! ReadableByteStreamControllerInvalidateBYOBRequest(controller).
        controller.invalidate_byob_request();
    }

    if matches!(inner.state, StreamState::Closed) {
        respond_in_closed_state(inner);
    } else {
        respond_in_readable_state(inner, bytes_written);
    }
}

/// ReadableByteStreamControllerRespondInClosedState.
fn respond_in_closed_state<T: 'static>(inner: &mut StreamInner<T>) {
    {
        let controller = inner
            .controller
            .as_byte_mut()
            .expect("respond requires a byte controller");
        let first = controller
            .pending_pull_intos
            .front()
            .expect("respond requires a pending descriptor");
        // Assert: the remainder after dividing bytesFilled by elementSize is 0.
        debug_assert_eq!(first.bytes_filled % first.element_size, 0);

        // If firstDescriptor's reader type is "none", perform
        // ! ReadableByteStreamControllerShiftPendingPullInto(controller).
        if first.reader_type == ReaderType::None {
            controller.pending_pull_intos.pop_front();
        }
    }

    // If ! ReadableStreamHasBYOBReader(stream) is true, commit one
    // descriptor per pending read-into request.
    while inner.reader.num_read_into_requests() > 0 {
        let descriptor = {
            let controller = inner.controller.as_byte_mut().unwrap();
            match controller.pending_pull_intos.pop_front() {
                Some(descriptor) => descriptor,
                None => break,
            }
        };
        commit_pull_into_descriptor(inner, descriptor);
    }
}

/// ReadableByteStreamControllerRespondInReadableState.
fn respond_in_readable_state<T: 'static>(inner: &mut StreamInner<T>, bytes_written: usize) {
    let reader_type = {
        let controller = inner
            .controller
            .as_byte_mut()
            .expect("respond requires a byte controller");

        // Perform ! ReadableByteStreamControllerFillHeadPullIntoDescriptor.
        let first = controller
            .pending_pull_intos
            .front_mut()
            .expect("respond requires a pending descriptor");
        debug_assert!(first.bytes_filled + bytes_written <= first.byte_length);
        first.bytes_filled += bytes_written;

        if first.reader_type != ReaderType::None && first.bytes_filled < first.minimum_fill {
            // Not enough for the consumer yet; wait for further responds.
            return;
        }
        first.reader_type
    };

    if reader_type == ReaderType::None {
        // Bytes for a vanished reader: move the filled prefix to the queue
        // and let waiting descriptors drain it.
        let controller = inner.controller.as_byte_mut().unwrap();
        enqueue_detached_pull_into(controller);
        process_pull_into_descriptors_using_queue(inner);
        return;
    }

    // Perform ! ReadableByteStreamControllerShiftPendingPullInto(controller).
    let descriptor = {
        let controller = inner.controller.as_byte_mut().unwrap();
        let mut descriptor = controller.pending_pull_intos.pop_front().unwrap();

        // A sub-element tail is cloned back onto the queue.
        let remainder_size = descriptor.bytes_filled % descriptor.element_size;
        if remainder_size > 0 {
            let end = descriptor.byte_offset + descriptor.bytes_filled;
            enqueue_cloned_chunk(
                controller,
                &descriptor.buffer,
                end - remainder_size,
                remainder_size,
            );
        }
        descriptor.bytes_filled -= remainder_size;
        descriptor
    };

    // Perform ! ReadableByteStreamControllerCommitPullIntoDescriptor.
    commit_pull_into_descriptor(inner, descriptor);
    process_pull_into_descriptors_using_queue(inner);
}

/// The byte controller's [[ReleaseSteps]].
pub(crate) fn byte_controller_release_steps<T>(inner: &mut StreamInner<T>) {
    if let ControllerState::Byte(controller) = &mut inner.controller {
        // If this.[[pendingPullIntos]] is not empty, the first descriptor
        // survives with reader type "none"; the rest are dropped.
        if let Some(mut first) = controller.pending_pull_intos.pop_front() {
            controller.invalidate_byob_request();
            first.reader_type = ReaderType::None;
            controller.pending_pull_intos.clear();
            controller.pending_pull_intos.push_front(first);
        }
    }
}
