use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use strato_exceptions::{WebError, WebResult};
use strato_utils::queue::Queue;

use crate::utils::promise::{Deferred, StreamFuture};

use super::reader::{ReadIntoRequest, ReadRequest};

use crate::queuing_strategy::SizeAlgorithm;

/// Zero-argument pull thunk; the controller handle is captured at setup so
/// the scheduling machinery stays chunk-type agnostic.
pub(crate) type PullFn = Box<dyn FnMut() -> StreamFuture>;
pub(crate) type CancelFn = Box<dyn FnOnce(Option<WebError>) -> StreamFuture>;

pub(crate) type SharedStream<T> = Rc<RefCell<StreamInner<T>>>;

/// A detached typed-array view: the buffer is owned, so moving the view is
/// the transfer step of the original and the source can never alias it.
#[derive(Debug)]
pub struct ByteView {
    buffer: Vec<u8>,
    byte_offset: usize,
    byte_length: usize,
    element_size: usize,
}

impl ByteView {
    /// A view covering the whole buffer, one byte per element.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        let byte_length = buffer.len();
        Self {
            buffer,
            byte_offset: 0,
            byte_length,
            element_size: 1,
        }
    }

    /// A zero-filled destination buffer for BYOB reads.
    pub fn zeroed(byte_length: usize) -> Self {
        Self::from_vec(vec![0; byte_length])
    }

    pub fn with_layout(
        buffer: Vec<u8>,
        byte_offset: usize,
        byte_length: usize,
        element_size: usize,
    ) -> WebResult<Self> {
        if element_size == 0 || byte_length % element_size != 0 {
            return Err(WebError::range_error(
                "View length must be a multiple of the element size",
            ));
        }
        if byte_offset
            .checked_add(byte_length)
            .map_or(true, |end| end > buffer.len())
        {
            return Err(WebError::range_error("View is outside the buffer bounds"));
        }
        Ok(Self {
            buffer,
            byte_offset,
            byte_length,
            element_size,
        })
    }

    /// Reinterprets the view with a wider element, e.g. 2 for Uint16-like
    /// reads. The viewed range must stay aligned.
    pub fn with_element_size(mut self, element_size: usize) -> WebResult<Self> {
        if element_size == 0 || self.byte_length % element_size != 0 {
            return Err(WebError::range_error(
                "View length must be a multiple of the element size",
            ));
        }
        self.element_size = element_size;
        Ok(self)
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn buffer_byte_length(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_length == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.byte_offset..self.byte_offset + self.byte_length]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Gives the whole underlying buffer back, discarding the view window.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Consumes the view into just the viewed bytes.
    pub fn into_buffer_window(self) -> Vec<u8> {
        if self.byte_offset == 0 && self.byte_length == self.buffer.len() {
            self.buffer
        } else {
            self.buffer[self.byte_offset..self.byte_offset + self.byte_length].to_vec()
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, usize, usize, usize) {
        (
            self.buffer,
            self.byte_offset,
            self.byte_length,
            self.element_size,
        )
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(buffer: Vec<u8>) -> Self {
        Self::from_vec(buffer)
    }
}

impl From<&[u8]> for ByteView {
    fn from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }
}

pub enum StreamState {
    Readable,
    Closed,
    Errored(WebError),
}

pub(crate) struct StreamInner<T: 'static> {
    pub state: StreamState,
    pub disturbed: bool,
    pub controller: ControllerState<T>,
    pub reader: ReaderState<T>,
}

pub(crate) enum ControllerState<T: 'static> {
    Default(DefaultControllerState<T>),
    Byte(ByteControllerState<T>),
}

impl<T> ControllerState<T> {
    pub fn as_default_mut(&mut self) -> Option<&mut DefaultControllerState<T>> {
        match self {
            ControllerState::Default(c) => Some(c),
            ControllerState::Byte(_) => None,
        }
    }

    pub fn as_byte_mut(&mut self) -> Option<&mut ByteControllerState<T>> {
        match self {
            ControllerState::Byte(c) => Some(c),
            ControllerState::Default(_) => None,
        }
    }

    pub fn as_byte(&self) -> Option<&ByteControllerState<T>> {
        match self {
            ControllerState::Byte(c) => Some(c),
            ControllerState::Default(_) => None,
        }
    }

    pub fn is_byte(&self) -> bool {
        matches!(self, ControllerState::Byte(_))
    }

    pub fn started(&self) -> bool {
        match self {
            ControllerState::Default(c) => c.started,
            ControllerState::Byte(c) => c.started,
        }
    }

    pub fn set_started(&mut self) {
        match self {
            ControllerState::Default(c) => c.started = true,
            ControllerState::Byte(c) => c.started = true,
        }
    }

    pub fn close_requested(&self) -> bool {
        match self {
            ControllerState::Default(c) => c.close_requested,
            ControllerState::Byte(c) => c.close_requested,
        }
    }

    pub fn pulling(&self) -> bool {
        match self {
            ControllerState::Default(c) => c.pulling,
            ControllerState::Byte(c) => c.pulling,
        }
    }

    pub fn set_pulling(&mut self, pulling: bool) {
        match self {
            ControllerState::Default(c) => c.pulling = pulling,
            ControllerState::Byte(c) => c.pulling = pulling,
        }
    }

    pub fn pull_again(&self) -> bool {
        match self {
            ControllerState::Default(c) => c.pull_again,
            ControllerState::Byte(c) => c.pull_again,
        }
    }

    pub fn set_pull_again(&mut self, pull_again: bool) {
        match self {
            ControllerState::Default(c) => c.pull_again = pull_again,
            ControllerState::Byte(c) => c.pull_again = pull_again,
        }
    }

    pub fn pull_algorithm(&self) -> Option<Rc<RefCell<PullFn>>> {
        match self {
            ControllerState::Default(c) => c.pull_algorithm.clone(),
            ControllerState::Byte(c) => c.pull_algorithm.clone(),
        }
    }
}

pub(crate) struct DefaultControllerState<T: 'static> {
    pub queue: VecDeque<ValueWithSize<T>>,
    pub queue_total_size: f64,
    pub started: bool,
    pub close_requested: bool,
    pub pulling: bool,
    pub pull_again: bool,
    pub strategy_hwm: f64,
    pub size_algorithm: Option<SizeAlgorithm<T>>,
    pub pull_algorithm: Option<Rc<RefCell<PullFn>>>,
    pub cancel_algorithm: Option<CancelFn>,
}

pub(crate) struct ValueWithSize<T> {
    pub value: T,
    pub size: f64,
}

impl<T> DefaultControllerState<T> {
    pub fn reset_queue(&mut self) {
        // Set container.[[queue]] to a new empty list.
        self.queue.clear();
        // Set container.[[queueTotalSize]] to 0.
        self.queue_total_size = 0.0;
    }

    pub fn dequeue_value(&mut self) -> T {
        let value_with_size = self
            .queue
            .pop_front()
            .expect("DequeueValue called with empty queue");
        self.queue_total_size -= value_with_size.size;
        // Rounding errors can drive the sum below zero.
        if self.queue_total_size < 0.0 {
            self.queue_total_size = 0.0;
        }
        value_with_size.value
    }

    pub fn clear_algorithms(&mut self) {
        self.pull_algorithm = None;
        self.cancel_algorithm = None;
        self.size_algorithm = None;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ReaderType {
    Default,
    Byob,
    /// The descriptor outlived its reader; filled bytes fall back to the
    /// queue instead of a consumer.
    None,
}

/// A pending BYOB read: target buffer, fill progress, element layout.
pub(crate) struct PullIntoDescriptor {
    pub buffer: Vec<u8>,
    pub buffer_byte_length: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub bytes_filled: usize,
    pub minimum_fill: usize,
    pub element_size: usize,
    pub reader_type: ReaderType,
}

pub(crate) struct ByteQueueEntry {
    pub buffer: Vec<u8>,
    pub byte_offset: usize,
    pub byte_length: usize,
}

pub(crate) struct ByteControllerState<T: 'static> {
    pub queue: VecDeque<ByteQueueEntry>,
    pub queue_total_size: usize,
    pub started: bool,
    pub close_requested: bool,
    pub pulling: bool,
    pub pull_again: bool,
    pub strategy_hwm: f64,
    pub auto_allocate_chunk_size: Option<usize>,
    pub pending_pull_intos: VecDeque<PullIntoDescriptor>,
    /// Bumped whenever the first descriptor advances; outstanding
    /// BYOBRequest handles compare against it.
    pub byob_request_generation: u64,
    pub pull_algorithm: Option<Rc<RefCell<PullFn>>>,
    pub cancel_algorithm: Option<CancelFn>,
    /// Converts a committed view into the stream's chunk type; identity for
    /// byte streams, which are the only streams this controller serves.
    pub make_chunk: fn(ByteView) -> T,
}

impl<T> ByteControllerState<T> {
    pub fn reset_queue(&mut self) {
        self.queue.clear();
        self.queue_total_size = 0;
    }

    pub fn clear_algorithms(&mut self) {
        self.pull_algorithm = None;
        self.cancel_algorithm = None;
    }

    pub fn invalidate_byob_request(&mut self) {
        self.byob_request_generation += 1;
    }

    pub fn clear_pending_pull_intos(&mut self) {
        // Perform ! ReadableByteStreamControllerInvalidateBYOBRequest(controller).
        self.invalidate_byob_request();
        // Set controller.[[pendingPullIntos]] to a new empty list.
        self.pending_pull_intos.clear();
    }
}

pub(crate) enum ReaderState<T: 'static> {
    None,
    Default(DefaultReaderState<T>),
    Byob(ByobReaderState),
}

pub(crate) struct DefaultReaderState<T: 'static> {
    pub read_requests: Queue<Box<dyn ReadRequest<T>>>,
    pub closed: Deferred,
}

pub(crate) struct ByobReaderState {
    pub read_into_requests: Queue<Box<dyn ReadIntoRequest>>,
    pub closed: Deferred,
}

/// Copyable discriminant of the reader sum type, for dispatch sites that
/// must not hold a borrow across the branch.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderKind {
    None,
    Default,
    Byob,
}

impl<T> ReaderState<T> {
    pub fn kind(&self) -> ReaderKind {
        match self {
            ReaderState::None => ReaderKind::None,
            ReaderState::Default(_) => ReaderKind::Default,
            ReaderState::Byob(_) => ReaderKind::Byob,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ReaderState::None)
    }

    pub fn as_default_mut(&mut self) -> Option<&mut DefaultReaderState<T>> {
        match self {
            ReaderState::Default(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_byob_mut(&mut self) -> Option<&mut ByobReaderState> {
        match self {
            ReaderState::Byob(r) => Some(r),
            _ => None,
        }
    }

    pub fn num_read_requests(&self) -> usize {
        match self {
            ReaderState::Default(r) => r.read_requests.len(),
            _ => 0,
        }
    }

    pub fn num_read_into_requests(&self) -> usize {
        match self {
            ReaderState::Byob(r) => r.read_into_requests.len(),
            _ => 0,
        }
    }

    pub fn closed(&self) -> Option<&Deferred> {
        match self {
            ReaderState::Default(r) => Some(&r.closed),
            ReaderState::Byob(r) => Some(&r.closed),
            ReaderState::None => None,
        }
    }
}
