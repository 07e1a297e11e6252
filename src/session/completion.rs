//! Completion handles for asynchronous operations.
//!
//! Every session operation returns immediately with a [`Completion`]. The
//! session keeps the matching [`Responder`] with the pending request and fires
//! it exactly once: on the acknowledgment, on a rejection, when retries run
//! out, or when the session ends.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::core::RequestError;

/// Result of a single operation.
pub type Outcome<T> = Result<T, RequestError>;

/// Handle to the eventual outcome of an operation.
///
/// Await it for `Some(outcome)`. It resolves to `None` only when the request
/// was abandoned without an answer, which happens to a gateway search replaced
/// by a newer one.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    buffered: Option<Outcome<T>>,
    done: bool,
}

impl<T> Completion<T> {
    /// Create a connected responder/handle pair.
    pub(crate) fn pair() -> (Responder<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            rx,
            buffered: None,
            done: false,
        };
        (Responder { tx }, completion)
    }

    /// A handle that is already resolved.
    pub fn ready(outcome: Outcome<T>) -> Self {
        let (responder, completion) = Self::pair();
        responder.resolve(outcome);
        completion
    }

    /// Take the outcome if it is available, without waiting.
    ///
    /// Returns `None` while pending, once the outcome was taken, or if the
    /// request was abandoned.
    pub fn try_outcome(&mut self) -> Option<Outcome<T>> {
        self.fill();
        let outcome = self.buffered.take();
        if outcome.is_some() {
            self.done = true;
        }
        outcome
    }

    /// True if the request was dropped without ever resolving.
    pub fn is_abandoned(&mut self) -> bool {
        !self.fill() && !self.done && self.buffered.is_none()
    }

    /// Move a delivered outcome into the buffer. Returns false once the
    /// sender is gone.
    fn fill(&mut self) -> bool {
        if self.done || self.buffered.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.buffered = Some(outcome);
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => false,
        }
    }
}

// The outcome is never pinned.
impl<T> Unpin for Completion<T> {}

impl<T> Future for Completion<T> {
    type Output = Option<Outcome<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(outcome) = this.buffered.take() {
            this.done = true;
            return Poll::Ready(Some(outcome));
        }
        if this.done {
            return Poll::Ready(None);
        }
        Pin::new(&mut this.rx).poll(cx).map(|result| {
            this.done = true;
            result.ok()
        })
    }
}

/// Sending half kept with a pending request.
#[derive(Debug)]
pub(crate) struct Responder<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

impl<T> Responder<T> {
    /// Deliver the outcome. A dropped handle is not an error.
    pub(crate) fn resolve(self, outcome: Outcome<T>) {
        let _ = self.tx.send(outcome);
    }

    pub(crate) fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    pub(crate) fn fail(self, error: RequestError) {
        self.resolve(Err(error));
    }
}
