use strato_exceptions::WebError;

use super::objects::ByteView;

/// A single pending consumer: the (chunk, close, error) callback triple of
/// the original, as a consume-once trait. Implementations must be inert —
/// they may complete a waiting future but never re-enter the stream.
pub(crate) trait ReadRequest<T> {
    fn chunk_steps(self: Box<Self>, chunk: T);
    fn close_steps(self: Box<Self>);
    fn error_steps(self: Box<Self>, e: WebError);
}

/// The BYOB counterpart; close steps may carry the (possibly empty) view so
/// the consumer gets its buffer back.
pub(crate) trait ReadIntoRequest {
    fn chunk_steps(self: Box<Self>, chunk: ByteView);
    fn close_steps(self: Box<Self>, chunk: Option<ByteView>);
    fn error_steps(self: Box<Self>, e: WebError);
}

/// One default read() in flight, completed through a oneshot.
pub(crate) struct ChannelReadRequest<T> {
    tx: tokio::sync::oneshot::Sender<Result<Option<T>, WebError>>,
}

impl<T> ChannelReadRequest<T> {
    pub fn new() -> (
        Self,
        tokio::sync::oneshot::Receiver<Result<Option<T>, WebError>>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (Self { tx }, rx)
    }
}

impl<T> ReadRequest<T> for ChannelReadRequest<T> {
    fn chunk_steps(self: Box<Self>, chunk: T) {
        let _ = self.tx.send(Ok(Some(chunk)));
    }

    fn close_steps(self: Box<Self>) {
        let _ = self.tx.send(Ok(None));
    }

    fn error_steps(self: Box<Self>, e: WebError) {
        let _ = self.tx.send(Err(e));
    }
}

/// The result of a BYOB read: the filled view (when the buffer survived)
/// and whether the stream is done.
#[derive(Debug)]
pub struct ByobRead {
    pub view: Option<ByteView>,
    pub done: bool,
}

pub(crate) struct ChannelReadIntoRequest {
    tx: tokio::sync::oneshot::Sender<Result<ByobRead, WebError>>,
}

impl ChannelReadIntoRequest {
    pub fn new() -> (
        Self,
        tokio::sync::oneshot::Receiver<Result<ByobRead, WebError>>,
    ) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (Self { tx }, rx)
    }
}

impl ReadIntoRequest for ChannelReadIntoRequest {
    fn chunk_steps(self: Box<Self>, chunk: ByteView) {
        let _ = self.tx.send(Ok(ByobRead {
            view: Some(chunk),
            done: false,
        }));
    }

    fn close_steps(self: Box<Self>, chunk: Option<ByteView>) {
        let _ = self.tx.send(Ok(ByobRead {
            view: chunk,
            done: true,
        }));
    }

    fn error_steps(self: Box<Self>, e: WebError) {
        let _ = self.tx.send(Err(e));
    }
}
