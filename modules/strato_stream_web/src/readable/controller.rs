use std::rc::Rc;

use strato_exceptions::WebError;

use crate::utils::promise::{resolved, StreamFuture};

use super::objects::{ControllerState, SharedStream, StreamInner, StreamState};
use super::stream::readable_stream_error;

/// ReadableStream(Default|Byte)ControllerShouldCallPull, merged over the
/// controller sum type.
pub(crate) fn should_call_pull<T>(inner: &StreamInner<T>) -> bool {
    // If stream.[[state]] is not "readable", return false.
    if !matches!(inner.state, StreamState::Readable) {
        return false;
    }

    // If controller.[[closeRequested]] is true, return false.
    if inner.controller.close_requested() {
        return false;
    }

    // If controller.[[started]] is false, return false.
    if !inner.controller.started() {
        return false;
    }

    // If the stream is locked with pending read (or read-into) requests,
    // return true.
    if inner.reader.num_read_requests() > 0 || inner.reader.num_read_into_requests() > 0 {
        return true;
    }

    // Let desiredSize be the controller's desired size.
    let desired_size =
        desired_size(inner).expect("desiredSize must not be null while state is readable");

    // If desiredSize > 0, return true.
    desired_size > 0.0
}

/// ReadableStream(Default|Byte)ControllerCallPullIfNeeded.
///
/// The pull algorithm runs with no borrow held; its settlement is driven
/// by a task on the current LocalSet, the microtask of the original.
pub(crate) fn call_pull_if_needed<T>(stream: &SharedStream<T>) {
    let pull_algorithm = {
        let mut inner = stream.borrow_mut();

        // If shouldPull is false, return.
        if !should_call_pull(&inner) {
            return;
        }

        // If controller.[[pulling]] is true, set controller.[[pullAgain]]
        // to true and return.
        if inner.controller.pulling() {
            inner.controller.set_pull_again(true);
            return;
        }

        // Set controller.[[pulling]] to true.
        inner.controller.set_pulling(true);
        inner.controller.pull_algorithm()
    };

    let pull_algorithm = match pull_algorithm {
        Some(pull_algorithm) => pull_algorithm,
        // Cleared algorithms mean close or error already ran.
        None => return,
    };

    // Let pullPromise be the result of performing controller.[[pullAlgorithm]].
    let pull_promise: StreamFuture = {
        let mut pull_algorithm = pull_algorithm.borrow_mut();
        let pull_algorithm = &mut *pull_algorithm;
        pull_algorithm()
    };

    let stream = Rc::clone(stream);
    tokio::task::spawn_local(async move {
        match pull_promise.await {
            // Upon fulfillment of pullPromise,
            Ok(()) => {
                let pull_again = {
                    let mut inner = stream.borrow_mut();
                    // Set controller.[[pulling]] to false.
                    inner.controller.set_pulling(false);
                    // If controller.[[pullAgain]] is true, reset it and pull
                    // once more.
                    if inner.controller.pull_again() {
                        inner.controller.set_pull_again(false);
                        true
                    } else {
                        false
                    }
                };
                if pull_again {
                    call_pull_if_needed(&stream);
                }
            },
            // Upon rejection of pullPromise with reason e,
            Err(e) => {
                controller_error(&mut stream.borrow_mut(), e);
            },
        }
    });
}

/// ReadableStream(Default|Byte)ControllerError.
pub(crate) fn controller_error<T>(inner: &mut StreamInner<T>, e: WebError) {
    // If stream.[[state]] is not "readable", return.
    if !matches!(inner.state, StreamState::Readable) {
        return;
    }

    match &mut inner.controller {
        ControllerState::Default(c) => {
            // Perform ! ResetQueue(controller).
            c.reset_queue();
            // Perform ! ReadableStreamDefaultControllerClearAlgorithms(controller).
            c.clear_algorithms();
        },
        ControllerState::Byte(c) => {
            // Perform ! ReadableByteStreamControllerClearPendingPullIntos(controller).
            c.clear_pending_pull_intos();
            // Perform ! ResetQueue(controller).
            c.reset_queue();
            // Perform ! ReadableByteStreamControllerClearAlgorithms(controller).
            c.clear_algorithms();
        },
    }

    // Perform ! ReadableStreamError(stream, e).
    readable_stream_error(inner, e);
}

/// ReadableStream(Default|Byte)ControllerGetDesiredSize.
pub(crate) fn desired_size<T>(inner: &StreamInner<T>) -> Option<f64> {
    match &inner.state {
        // If state is "errored", return null.
        StreamState::Errored(_) => None,
        // If state is "closed", return 0.
        StreamState::Closed => Some(0.0),
        // Return controller.[[strategyHWM]] − controller.[[queueTotalSize]].
        StreamState::Readable => Some(match &inner.controller {
            ControllerState::Default(c) => c.strategy_hwm - c.queue_total_size,
            ControllerState::Byte(c) => c.strategy_hwm - c.queue_total_size as f64,
        }),
    }
}

/// The controller's [[CancelSteps]]: drop buffered state, clear the
/// algorithms and hand the cancel algorithm back to the caller, which runs
/// it with no borrow held.
pub(crate) fn take_cancel_steps<T>(
    inner: &mut StreamInner<T>,
    reason: Option<WebError>,
) -> impl FnOnce() -> StreamFuture {
    let cancel_algorithm = match &mut inner.controller {
        ControllerState::Default(c) => {
            // Perform ! ResetQueue(this).
            c.reset_queue();
            let cancel_algorithm = c.cancel_algorithm.take();
            // Perform ! ReadableStreamDefaultControllerClearAlgorithms(this).
            c.clear_algorithms();
            cancel_algorithm
        },
        ControllerState::Byte(c) => {
            // Perform ! ReadableByteStreamControllerClearPendingPullIntos(this).
            c.clear_pending_pull_intos();
            // Perform ! ResetQueue(this).
            c.reset_queue();
            let cancel_algorithm = c.cancel_algorithm.take();
            // Perform ! ReadableByteStreamControllerClearAlgorithms(this).
            c.clear_algorithms();
            cancel_algorithm
        },
    };

    move || match cancel_algorithm {
        Some(cancel_algorithm) => cancel_algorithm(reason),
        None => resolved(),
    }
}
