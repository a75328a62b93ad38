//! The async completion primitive: FIFO queues of pending operations.
//!
//! An operation that cannot finish synchronously registers a [`Completer`]
//! in the relevant queue while the pipe lock is held, then awaits the paired
//! [`Completion`] after releasing it. A later dispatch step (a peer's write
//! waking a read, a disconnect, a timer) completes the entry with a terminal
//! status. Entries whose awaiter has gone away are skipped rather than
//! completed, so a cancelled caller can never consume queued data.

use crate::status::PipeError;
use std::{collections::VecDeque, time::Duration};
use tokio::sync::oneshot;

/// Sending half of a pending operation, stored in an [`AsyncQueue`] (or on a
/// queued message, for write acknowledgements).
pub(crate) struct Completer<T>(oneshot::Sender<Result<T, PipeError>>);

/// Receiving half of a pending operation, awaited by the caller.
pub(crate) struct Completion<T>(oneshot::Receiver<Result<T, PipeError>>);

pub(crate) fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer(tx), Completion(rx))
}

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T, PipeError>) {
        let _ = self.0.send(result);
    }
    /// Whether the awaiting side has given up on this operation.
    pub fn is_stale(&self) -> bool {
        self.0.is_closed()
    }
}

impl<T> Completion<T> {
    /// Waits for the operation to be completed. A completer dropped without
    /// completing (its owning object was destroyed) reads as `Broken`.
    pub async fn wait(self) -> Result<T, PipeError> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(PipeError::Broken),
        }
    }
    /// Like [`wait`](Self::wait), but gives up after `deadline` with
    /// `IoTimeout`. The abandoned queue entry is skipped by the next
    /// completion pass.
    pub async fn wait_deadline(self, deadline: Duration) -> Result<T, PipeError> {
        match tokio::time::timeout(deadline, self.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PipeError::Broken),
            Err(_) => Err(PipeError::IoTimeout),
        }
    }
}

/// FIFO of pending operations, each carrying its request parameters `R` and
/// completing with a `T`.
pub(crate) struct AsyncQueue<R, T> {
    entries: VecDeque<(R, Completer<T>)>,
}

impl<R, T> AsyncQueue<R, T> {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }
    pub fn push(&mut self, request: R, completer: Completer<T>) {
        self.entries.push_back((request, completer));
    }
    /// Pops the oldest entry whose awaiter is still around.
    pub fn pop_live(&mut self) -> Option<(R, Completer<T>)> {
        while let Some((request, completer)) = self.entries.pop_front() {
            if !completer.is_stale() {
                return Some((request, completer));
            }
        }
        None
    }
    /// Force-completes every live entry, in FIFO order.
    pub fn complete_all(&mut self, mut result: impl FnMut() -> Result<T, PipeError>) {
        while let Some((_, completer)) = self.pop_live() {
            completer.complete(result());
        }
    }
    /// Drops entries whose awaiter has gone away.
    pub fn prune(&mut self) {
        self.entries.retain(|(_, completer)| !completer.is_stale());
    }
    pub fn has_live(&mut self) -> bool {
        self.prune();
        !self.entries.is_empty()
    }
}

impl<R, T> Default for AsyncQueue<R, T> {
    fn default() -> Self {
        Self::new()
    }
}
