use std::{cell::RefCell, future::Future, pin::Pin, rc::Rc};

use strato_exceptions::{WebError, WebResult};
use tokio::sync::Notify;

/// The settled-or-pending result of a stream algorithm; the promise shape
/// of the original collapsed onto boxed local futures.
pub(crate) type StreamFuture = Pin<Box<dyn Future<Output = WebResult<()>>>>;

pub(crate) fn resolved() -> StreamFuture {
    Box::pin(std::future::ready(Ok(())))
}

pub(crate) fn rejected(e: WebError) -> StreamFuture {
    Box::pin(std::future::ready(Err(e)))
}

struct DeferredInner {
    result: RefCell<Option<WebResult<()>>>,
    notify: Notify,
}

/// A settle-once cell with any number of waiters: the reader's closed
/// promise. Settling twice is a no-op, as is rejecting after resolve.
#[derive(Clone)]
pub(crate) struct Deferred {
    inner: Rc<DeferredInner>,
}

impl Deferred {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DeferredInner {
                result: RefCell::new(None),
                notify: Notify::new(),
            }),
        }
    }

    pub fn resolve(&self) {
        self.settle(Ok(()));
    }

    pub fn reject(&self, e: WebError) {
        self.settle(Err(e));
    }

    fn settle(&self, result: WebResult<()>) {
        let mut slot = self.inner.result.borrow_mut();
        if slot.is_none() {
            slot.replace(result);
            drop(slot);
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    pub fn same_as(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn wait(&self) -> WebResult<()> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.inner.result.borrow().as_ref() {
                return result.clone();
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settle_once() {
        let deferred = Deferred::new();
        assert!(!deferred.is_settled());
        deferred.resolve();
        deferred.reject(WebError::type_error("late"));
        assert_eq!(deferred.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn waiters_see_rejections() {
        let deferred = Deferred::new();
        let waiter = deferred.clone();
        deferred.reject(WebError::type_error("boom"));
        assert_eq!(waiter.wait().await, Err(WebError::type_error("boom")));
    }
}
