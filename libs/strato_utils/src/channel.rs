// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

/// Sentinels surfaced by the non-blocking channel entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is closed; no further items are accepted or yielded.
    Closed,
    /// `try_write` found the channel at capacity.
    Full,
    /// `try_read` found no buffered item.
    Empty,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "channel is closed"),
            ChannelError::Full => write!(f, "channel is full"),
            ChannelError::Empty => write!(f, "channel is empty"),
        }
    }
}

struct Shared<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

struct Inner<T> {
    shared: Mutex<Shared<T>>,
    readable: Notify,
    writable: Notify,
}

/// Bounded buffer channel backing byte-stream resources at the host
/// boundary (request bodies, response bodies, server events).
///
/// `try_write`/`try_read` are the synchronous fast paths; `Full` and
/// `Empty` tell the caller to fall back to the awaiting variants. Close is
/// idempotent and lets buffered items drain before readers observe it.
pub struct BufferChannel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> BufferChannel<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::with_capacity(capacity),
                    capacity,
                    closed: false,
                }),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    pub fn writer(&self) -> BufferChannelWriter<T> {
        BufferChannelWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn reader(&self) -> BufferChannelReader<T> {
        BufferChannelReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct BufferChannelWriter<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferChannelWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BufferChannelWriter<T> {
    pub fn try_write(&self, item: T) -> Result<(), (ChannelError, T)> {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.closed {
                return Err((ChannelError::Closed, item));
            }
            if shared.queue.len() >= shared.capacity {
                return Err((ChannelError::Full, item));
            }
            shared.queue.push_back(item);
        }
        self.inner.readable.notify_one();
        Ok(())
    }

    pub async fn write(&self, mut item: T) -> Result<(), ChannelError> {
        loop {
            let notified = self.inner.writable.notified();
            match self.try_write(item) {
                Ok(()) => return Ok(()),
                Err((ChannelError::Closed, _)) => return Err(ChannelError::Closed),
                Err((_, rejected)) => item = rejected,
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        close_inner(&self.inner, false);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.lock().unwrap().closed
    }
}

pub struct BufferChannelReader<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BufferChannelReader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BufferChannelReader<T> {
    pub fn try_read(&self) -> Result<T, ChannelError> {
        let item = {
            let mut shared = self.inner.shared.lock().unwrap();
            match shared.queue.pop_front() {
                Some(item) => item,
                None if shared.closed => return Err(ChannelError::Closed),
                None => return Err(ChannelError::Empty),
            }
        };
        self.inner.writable.notify_one();
        Ok(item)
    }

    /// Awaits the next item; `None` means closed and drained.
    pub async fn read(&self) -> Option<T> {
        loop {
            let notified = self.inner.readable.notified();
            match self.try_read() {
                Ok(item) => return Some(item),
                Err(ChannelError::Closed) => return None,
                Err(_) => {},
            }
            notified.await;
        }
    }

    /// Closes from the consumer side, dropping anything still buffered.
    pub fn close(&self) {
        close_inner(&self.inner, true);
    }
}

fn close_inner<T>(inner: &Arc<Inner<T>>, discard: bool) {
    {
        let mut shared = inner.shared.lock().unwrap();
        if shared.closed {
            return;
        }
        shared.closed = true;
        if discard {
            shared.queue.clear();
        }
    }
    inner.readable.notify_waiters();
    inner.writable.notify_waiters();
    // wake waiters that have not polled yet
    inner.readable.notify_one();
    inner.writable.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_then_drain() {
        let channel = BufferChannel::new(2);
        let writer = channel.writer();
        let reader = channel.reader();

        writer.try_write(1).unwrap();
        writer.try_write(2).unwrap();
        assert!(matches!(writer.try_write(3), Err((ChannelError::Full, 3))));

        let pending = tokio::spawn({
            let writer = writer.clone();
            async move { writer.write(3).await }
        });
        tokio::task::yield_now().await;

        assert_eq!(reader.read().await, Some(1));
        pending.await.unwrap().unwrap();
        assert_eq!(reader.try_read().unwrap(), 2);
        assert_eq!(reader.try_read().unwrap(), 3);
        assert!(matches!(reader.try_read(), Err(ChannelError::Empty)));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let channel = BufferChannel::new(4);
        let writer = channel.writer();
        let reader = channel.reader();

        writer.try_write("a").unwrap();
        writer.close();
        writer.close(); // idempotent

        assert!(matches!(
            writer.try_write("b"),
            Err((ChannelError::Closed, "b"))
        ));
        assert_eq!(reader.read().await, Some("a"));
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn reader_close_discards_buffered_items() {
        let channel = BufferChannel::new(4);
        let writer = channel.writer();
        let reader = channel.reader();

        writer.try_write(1).unwrap();
        reader.close();
        assert!(writer.is_closed());
        assert_eq!(reader.read().await, None);
    }

    #[tokio::test]
    async fn pending_read_wakes_on_close() {
        let channel = BufferChannel::<u8>::new(1);
        let reader = channel.reader();
        let writer = channel.writer();

        let pending = tokio::spawn(async move { reader.read().await });
        tokio::task::yield_now().await;
        writer.close();

        assert_eq!(pending.await.unwrap(), None);
    }
}
