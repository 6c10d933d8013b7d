// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    time::Duration,
};

use strato_events::{Event, EventTarget, Listener};
use strato_exceptions::{WebError, WebResult};
use strato_utils::{iterable_weak_set::IterableWeakSet, mc_oneshot};

pub(crate) struct SignalInner {
    state: RefCell<SignalState>,
    events: EventTarget,
    sender: mc_oneshot::Sender<WebError>,
}

struct SignalState {
    aborted: bool,
    reason: Option<WebError>,
    // Each runs exactly once, before the abort event fires.
    abort_algorithms: Vec<Box<dyn FnOnce(&WebError)>>,
    dependent: bool,
    source_signals: Vec<Weak<SignalInner>>,
    dependent_signals: IterableWeakSet<SignalInner>,
}

/// Cheaply cloneable handle; clones observe the same abort state.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Rc<SignalInner>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal").finish_non_exhaustive()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        let (sender, _) = mc_oneshot::channel();
        Self {
            inner: Rc::new(SignalInner {
                state: RefCell::new(SignalState {
                    aborted: false,
                    reason: None,
                    abort_algorithms: Vec::new(),
                    dependent: false,
                    source_signals: Vec::new(),
                    dependent_signals: IterableWeakSet::new(),
                }),
                events: EventTarget::new(),
                sender,
            }),
        }
    }

    /// Returns a signal that is already aborted with the given reason.
    pub fn abort(reason: Option<WebError>) -> Self {
        let signal = Self::new();
        signal.signal_abort(reason);
        signal
    }

    /// Returns a signal aborted with a TimeoutError after `milliseconds`.
    ///
    /// The timer runs on the current `LocalSet`.
    pub fn timeout(milliseconds: u64) -> Self {
        let signal = Self::new();
        let weak = Rc::downgrade(&signal.inner);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(milliseconds)).await;
            if let Some(inner) = weak.upgrade() {
                AbortSignal { inner }.signal_abort(Some(WebError::timeout_error()));
            }
        });
        signal
    }

    /// Returns a signal aborted when any of `signals` aborts.
    ///
    /// Dependent sources are flattened: composing over an `any` signal
    /// links to its sources instead, so chains never grow.
    pub fn any(signals: &[AbortSignal]) -> Self {
        let signal = Self::new();
        signal.inner.state.borrow_mut().dependent = true;

        // If any of signals is aborted, the composite adopts that reason.
        for source in signals {
            if let Some(reason) = source.reason() {
                {
                    let mut state = signal.inner.state.borrow_mut();
                    state.aborted = true;
                    state.reason = Some(reason);
                }
                return signal;
            }
        }

        for source in signals {
            let flattened: Vec<Rc<SignalInner>> = {
                let state = source.inner.state.borrow();
                if state.dependent {
                    state
                        .source_signals
                        .iter()
                        .filter_map(Weak::upgrade)
                        .collect()
                } else {
                    vec![Rc::clone(&source.inner)]
                }
            };
            for inner in flattened {
                let mut signal_state = signal.inner.state.borrow_mut();
                if signal_state
                    .source_signals
                    .iter()
                    .any(|existing| existing.as_ptr() == Rc::as_ptr(&inner))
                {
                    continue;
                }
                signal_state.source_signals.push(Rc::downgrade(&inner));
                drop(signal_state);
                inner
                    .state
                    .borrow_mut()
                    .dependent_signals
                    .insert(&signal.inner);
            }
        }

        signal
    }

    pub fn aborted(&self) -> bool {
        self.inner.state.borrow().aborted
    }

    pub fn reason(&self) -> Option<WebError> {
        self.inner.state.borrow().reason.clone()
    }

    pub fn throw_if_aborted(&self) -> WebResult<()> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// A receiver that resolves with the abort reason; select-friendly.
    pub fn subscribe(&self) -> mc_oneshot::Receiver<WebError> {
        self.inner.sender.subscribe()
    }

    pub fn on_abort(&self, listener: impl Fn(&Event) + 'static) {
        self.inner
            .events
            .add_event_listener("abort", Rc::new(listener), false);
    }

    pub fn remove_on_abort(&self, listener: &Listener) {
        self.inner.events.remove_event_listener("abort", listener);
    }

    /// Registers an internal abort algorithm. Not added once aborted;
    /// callers consult `aborted()` first, as the steps require.
    pub fn add_abort_algorithm(&self, algorithm: Box<dyn FnOnce(&WebError)>) {
        let mut state = self.inner.state.borrow_mut();
        if state.aborted {
            return;
        }
        state.abort_algorithms.push(algorithm);
    }

    /// Signal abort: records the reason, runs each abort algorithm once,
    /// fires `abort`, then cascades to dependent signals. Idempotent.
    pub fn signal_abort(&self, reason: Option<WebError>) {
        let (reason, algorithms, dependents) = {
            let mut state = self.inner.state.borrow_mut();
            if state.aborted {
                return;
            }
            state.aborted = true;
            let reason = reason.unwrap_or_else(WebError::abort_error);
            state.reason = Some(reason.clone());
            let algorithms = std::mem::take(&mut state.abort_algorithms);
            let dependents = state.dependent_signals.iter_strong();
            (reason, algorithms, dependents)
        };

        for algorithm in algorithms {
            algorithm(&reason);
        }

        self.inner.sender.send(reason.clone());
        self.inner.events.dispatch_event(&Event::new("abort"));

        for inner in dependents {
            AbortSignal { inner }.signal_abort(Some(reason.clone()));
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use strato_test::test_local;

    use super::*;

    #[test]
    fn abort_is_idempotent_and_runs_algorithms_once() {
        let signal = AbortSignal::new();
        let runs = Rc::new(Cell::new(0));
        signal.add_abort_algorithm({
            let runs = Rc::clone(&runs);
            Box::new(move |_| runs.set(runs.get() + 1))
        });

        signal.signal_abort(Some(WebError::type_error("first")));
        signal.signal_abort(Some(WebError::type_error("second")));

        assert_eq!(runs.get(), 1);
        assert_eq!(signal.reason(), Some(WebError::type_error("first")));
    }

    #[test]
    fn default_reason_is_abort_error() {
        let signal = AbortSignal::abort(None);
        assert!(signal.aborted());
        assert!(signal.reason().unwrap().is_abort());
        assert!(signal.throw_if_aborted().is_err());
    }

    #[test]
    fn any_cascades_with_the_same_reason() {
        let a = AbortSignal::new();
        let b = AbortSignal::new();
        let composite = AbortSignal::any(&[a.clone(), b.clone()]);
        assert!(!composite.aborted());

        b.signal_abort(Some(WebError::type_error("boom")));
        assert!(composite.aborted());
        assert_eq!(composite.reason(), Some(WebError::type_error("boom")));

        // the other source aborting afterwards changes nothing
        a.signal_abort(None);
        assert_eq!(composite.reason(), Some(WebError::type_error("boom")));
    }

    #[test]
    fn any_flattens_dependent_sources() {
        let root = AbortSignal::new();
        let first = AbortSignal::any(&[root.clone()]);
        let second = AbortSignal::any(&[first.clone()]);

        // second links to root, not to first
        assert_eq!(second.inner.state.borrow().source_signals.len(), 1);
        root.signal_abort(None);
        assert!(first.aborted());
        assert!(second.aborted());
    }

    #[test]
    fn any_adopts_an_already_aborted_source() {
        let aborted = AbortSignal::abort(Some(WebError::type_error("pre")));
        let composite = AbortSignal::any(&[AbortSignal::new(), aborted]);
        assert!(composite.aborted());
        assert_eq!(composite.reason(), Some(WebError::type_error("pre")));
    }

    #[tokio::test]
    async fn timeout_aborts_with_timeout_error() {
        test_local(async {
            let signal = AbortSignal::timeout(5);
            assert!(!signal.aborted());
            let reason = signal.subscribe().recv().await;
            assert_eq!(reason, WebError::timeout_error());
            assert!(signal.aborted());
        })
        .await;
    }

    #[tokio::test]
    async fn abort_event_fires_after_algorithms() {
        test_local(async {
            let signal = AbortSignal::new();
            let order = Rc::new(RefCell::new(Vec::new()));

            signal.add_abort_algorithm({
                let order = Rc::clone(&order);
                Box::new(move |_| order.borrow_mut().push("algorithm"))
            });
            signal.on_abort({
                let order = Rc::clone(&order);
                move |_| order.borrow_mut().push("event")
            });

            signal.signal_abort(None);
            assert_eq!(*order.borrow(), ["algorithm", "event"]);
        })
        .await;
    }
}
