// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{cell::RefCell, rc::Rc};

use tokio::sync::Notify;

/// Multi-consumer oneshot: the value is sent at most once and every
/// receiver, subscribed before or after the send, observes it.
///
/// Used to fan an abort reason out into select loops. Handles are cheap
/// clones sharing one slot; everything stays on the current thread.
struct Shared<T> {
    value: RefCell<Option<T>>,
    notify: Notify,
}

pub struct Sender<T: Clone>(Rc<Shared<T>>);

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone> Sender<T> {
    pub fn send(&self, value: T) {
        let mut slot = self.0.value.borrow_mut();
        if slot.is_none() {
            slot.replace(value);
            drop(slot);
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_sent(&self) -> bool {
        self.0.value.borrow().is_some()
    }

    pub fn subscribe(&self) -> Receiver<T> {
        Receiver(Rc::clone(&self.0))
    }
}

pub struct Receiver<T: Clone>(Rc<Shared<T>>);

impl<T: Clone> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone> Receiver<T> {
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.0.notify.notified();
            if let Some(value) = self.0.value.borrow().as_ref() {
                return value.clone();
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.0.value.borrow().clone()
    }
}

pub fn channel<T: Clone>() -> (Sender<T>, Receiver<T>) {
    let shared = Rc::new(Shared {
        value: RefCell::new(None),
        notify: Notify::new(),
    });
    (Sender(Rc::clone(&shared)), Receiver(shared))
}
