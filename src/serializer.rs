//! # Request Serializer
//!
//! Keeps at most one Modbus transaction in flight per client. RTU framing has
//! no transaction id, so a response can only be attributed to its request if
//! nothing else is outstanding on the bus.
//!
//! Exclusive access is handed out as an [`ExclusiveGuard`]; dropping the guard
//! releases the permit, so every exit path (success, `?` early return, panic,
//! or the caller dropping the future) gives the bus back. Waiters are served
//! in the order they asked.
//!
//! No deadline is applied here. A transport call that never returns keeps the
//! permit and blocks every later transaction on the same client.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// FIFO mutual exclusion around the state one transaction needs
#[derive(Debug)]
pub struct RequestSerializer<S> {
    inner: Mutex<S>,
    next_ticket: AtomicU64,
}

impl<S> RequestSerializer<S> {
    pub fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(state),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> ExclusiveGuard<'_, S> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        trace!(ticket, "waiting for bus");
        let guard = self.inner.lock().await;
        trace!(ticket, "bus acquired");
        ExclusiveGuard { guard, ticket }
    }

    /// Run `operation` with exclusive access and release afterwards, whatever the outcome.
    pub async fn run_exclusive<'a, F, Fut, R>(&'a self, operation: F) -> R
    where
        F: FnOnce(ExclusiveGuard<'a, S>) -> Fut,
        Fut: Future<Output = R>,
    {
        let guard = self.acquire().await;
        operation(guard).await
    }

    /// Access the state without locking; `&mut self` proves nobody else holds it.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

/// Scoped permit; the bus is released when this is dropped
pub struct ExclusiveGuard<'a, S> {
    guard: MutexGuard<'a, S>,
    ticket: u64,
}

impl<S> ExclusiveGuard<'_, S> {
    /// Acquisition order of this permit (1-based)
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<S> Deref for ExclusiveGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for ExclusiveGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

impl<S> Drop for ExclusiveGuard<'_, S> {
    fn drop(&mut self) {
        trace!(ticket = self.ticket, "bus released");
    }
}
