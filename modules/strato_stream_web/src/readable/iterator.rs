use futures_util::Stream;
use strato_exceptions::{WebError, WebResult};

use super::default_reader::ReadableStreamDefaultReader;
use super::stream::ReadableStream;

impl<T: 'static> ReadableStream<T> {
    /// values() — async iteration, canceling the stream when iteration
    /// stops early.
    pub fn values(&self) -> ReadableStreamAsyncIterator<T> {
        self.values_with_options(false)
    }

    /// values({ preventCancel }) — the reader is acquired lazily, on the
    /// first `next`; a locked stream surfaces there.
    pub fn values_with_options(&self, prevent_cancel: bool) -> ReadableStreamAsyncIterator<T> {
        ReadableStreamAsyncIterator {
            stream: self.clone(),
            reader: None,
            prevent_cancel,
            finished: false,
        }
    }
}

/// https://streams.spec.whatwg.org/#rs-asynciterator
pub struct ReadableStreamAsyncIterator<T: 'static> {
    stream: ReadableStream<T>,
    reader: Option<ReadableStreamDefaultReader<T>>,
    prevent_cancel: bool,
    finished: bool,
}

impl<T: 'static> ReadableStreamAsyncIterator<T> {
    /// The iterator's next steps; `None` is exhaustion.
    pub async fn next(&mut self) -> WebResult<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        if self.reader.is_none() {
            self.reader = Some(self.stream.get_reader()?);
        }
        let reader = self.reader.as_ref().expect("reader acquired above");

        match reader.read().await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.finished = true;
                self.release();
                Ok(None)
            },
            Err(e) => {
                self.finished = true;
                self.release();
                Err(e)
            },
        }
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.release_lock();
        }
    }

    /// The iterator's return steps: cancels the stream unless
    /// preventCancel was set.
    pub async fn finish(mut self, reason: Option<WebError>) -> WebResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if self.prevent_cancel {
            self.release();
            return Ok(());
        }

        match self.reader.take() {
            Some(reader) => {
                let result = reader.cancel(reason).await;
                reader.release_lock();
                result
            },
            None => self.stream.cancel(reason).await,
        }
    }

    /// Adapts the iterator to a `futures_util::Stream` of chunks.
    pub fn into_stream(self) -> impl Stream<Item = WebResult<T>> {
        futures_util::stream::unfold(self, |mut iterator| async move {
            match iterator.next().await {
                Ok(Some(chunk)) => Some((Ok(chunk), iterator)),
                Ok(None) => None,
                Err(e) => Some((Err(e), iterator)),
            }
        })
    }
}
