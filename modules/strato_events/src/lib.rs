// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{cell::RefCell, rc::Rc};

use tracing::trace;

/// A dispatched event. Only the pieces the runtime needs: the type string
/// and whether a listener may observe it more than once is a listener
/// concern, not an event concern.
#[derive(Clone)]
pub struct Event {
    event_type: Rc<str>,
}

impl Event {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

pub type Listener = Rc<dyn Fn(&Event)>;

struct Registration {
    event_type: Rc<str>,
    listener: Listener,
    once: bool,
}

/// Listener registry in the shape of the DOM EventTarget, reduced to the
/// seam the runtime dispatches through (abort signals, server lifecycle).
#[derive(Default)]
pub struct EventTarget {
    registrations: RefCell<Vec<Registration>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event_listener(&self, event_type: &str, listener: Listener, once: bool) {
        self.registrations.borrow_mut().push(Registration {
            event_type: event_type.into(),
            listener,
            once,
        });
    }

    /// Removes a previously added listener; identity is pointer equality.
    pub fn remove_event_listener(&self, event_type: &str, listener: &Listener) {
        self.registrations.borrow_mut().retain(|registration| {
            !(registration.event_type.as_ref() == event_type
                && Rc::ptr_eq(&registration.listener, listener))
        });
    }

    pub fn dispatch_event(&self, event: &Event) {
        // Snapshot so listeners may add or remove listeners while firing.
        let snapshot: Vec<Listener> = {
            let mut registrations = self.registrations.borrow_mut();
            let matching: Vec<Listener> = registrations
                .iter()
                .filter(|r| r.event_type.as_ref() == event.event_type())
                .map(|r| Rc::clone(&r.listener))
                .collect();
            registrations.retain(|r| !(r.event_type.as_ref() == event.event_type() && r.once));
            matching
        };

        trace!(
            event_type = event.event_type(),
            listeners = snapshot.len(),
            "dispatch"
        );
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn has_listeners(&self, event_type: &str) -> bool {
        self.registrations
            .borrow()
            .iter()
            .any(|r| r.event_type.as_ref() == event_type)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn once_listeners_fire_once() {
        let target = EventTarget::new();
        let count = Rc::new(Cell::new(0));

        let listener: Listener = {
            let count = Rc::clone(&count);
            Rc::new(move |_event: &Event| count.set(count.get() + 1))
        };
        target.add_event_listener("abort", listener, true);

        target.dispatch_event(&Event::new("abort"));
        target.dispatch_event(&Event::new("abort"));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn removal_is_by_identity() {
        let target = EventTarget::new();
        let hits = Rc::new(Cell::new(0));

        let a: Listener = {
            let hits = Rc::clone(&hits);
            Rc::new(move |_| hits.set(hits.get() + 1))
        };
        let b: Listener = {
            let hits = Rc::clone(&hits);
            Rc::new(move |_| hits.set(hits.get() + 10))
        };
        target.add_event_listener("message", Rc::clone(&a), false);
        target.add_event_listener("message", Rc::clone(&b), false);
        target.remove_event_listener("message", &a);

        target.dispatch_event(&Event::new("message"));
        assert_eq!(hits.get(), 10);
    }

    #[test]
    fn unrelated_types_do_not_fire() {
        let target = EventTarget::new();
        let fired = Rc::new(Cell::new(false));
        let listener: Listener = {
            let fired = Rc::clone(&fired);
            Rc::new(move |_| fired.set(true))
        };
        target.add_event_listener("abort", listener, false);
        target.dispatch_event(&Event::new("close"));
        assert!(!fired.get());
        assert!(target.has_listeners("abort"));
    }
}
