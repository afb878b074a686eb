//! `BoundedMessageBuffer` (C3): the producer/consumer handoff at the root of
//! both the ingestion and query pipelines.
//!
//! Grounded in the teacher framework's `spark-core::buffer` contract
//! (`ReadableBuffer`/`WritableBuffer` over a `PipelineMessage`) generalized
//! to a concrete, owned, `tokio`-backed queue with the four-state lifecycle
//! this spec requires: `Inactive -> Supplying -> Draining -> Closed`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cancel::{CancelToken, cancellable};
use crate::error::{DpError, DpResult};

/// Lifecycle state of a [`BoundedMessageBuffer`] (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    Inactive = 0,
    Supplying = 1,
    Draining = 2,
    Closed = 3,
}

impl BufferState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BufferState::Inactive,
            1 => BufferState::Supplying,
            2 => BufferState::Draining,
            _ => BufferState::Closed,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BufferState::Inactive => "Inactive",
            BufferState::Supplying => "Supplying",
            BufferState::Draining => "Draining",
            BufferState::Closed => "Closed",
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    state: BufferState,
    capacity: Option<usize>,
}

/// A bounded, state-machined queue shared between exactly one producer side
/// and one consumer side. Capacity of `None` means unbounded.
pub struct BoundedMessageBuffer<T> {
    inner: Mutex<Inner<T>>,
    state_mirror: AtomicU8,
    not_empty: Notify,
    not_full: Notify,
    state_changed: Notify,
}

impl<T> BoundedMessageBuffer<T> {
    pub fn new(capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: BufferState::Inactive,
                capacity,
            }),
            state_mirror: AtomicU8::new(BufferState::Inactive as u8),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            state_changed: Notify::new(),
        })
    }

    /// Fast, synchronous, possibly-stale read of whether the buffer is
    /// currently accepting new items. Does not take the lock.
    pub fn is_supplying(&self) -> bool {
        BufferState::from_u8(self.state_mirror.load(Ordering::Acquire)) == BufferState::Supplying
    }

    pub async fn state(&self) -> BufferState {
        self.inner.lock().state
    }

    fn set_state(&self, guard: &mut Inner<T>, state: BufferState) {
        guard.state = state;
        self.state_mirror.store(state as u8, Ordering::Release);
        self.state_changed.notify_waiters();
    }

    /// `Inactive -> Supplying`. Idempotent if already supplying.
    pub async fn activate(&self) -> DpResult<()> {
        let mut guard = self.inner.lock();
        match guard.state {
            BufferState::Inactive => {
                self.set_state(&mut guard, BufferState::Supplying);
                Ok(())
            }
            BufferState::Supplying => Ok(()),
            other => Err(DpError::state("Inactive", other.name())),
        }
    }

    /// Enqueues one item, waiting for room if the buffer is at capacity.
    pub async fn enqueue(&self, item: T, token: Option<&CancelToken>) -> DpResult<()> {
        loop {
            let mut guard = self.inner.lock();
            match guard.state {
                BufferState::Supplying => {
                    if let Some(cap) = guard.capacity {
                        if guard.queue.len() >= cap {
                            drop(guard);
                            cancellable(token, self.not_full.notified()).await?;
                            continue;
                        }
                    }
                    guard.queue.push_back(item);
                    self.not_empty.notify_waiters();
                    return Ok(());
                }
                BufferState::Inactive => {
                    return Err(DpError::state("Supplying", "Inactive"));
                }
                BufferState::Draining | BufferState::Closed => return Err(DpError::Closed),
            }
        }
    }

    pub async fn enqueue_all(
        &self,
        items: impl IntoIterator<Item = T>,
        token: Option<&CancelToken>,
    ) -> DpResult<()> {
        for item in items {
            self.enqueue(item, token).await?;
        }
        Ok(())
    }

    /// Attempts to dequeue one item without waiting.
    pub async fn poll(&self) -> DpResult<Option<T>> {
        let mut guard = self.inner.lock();
        self.take_locked(&mut guard)
    }

    /// Blocks until an item is available, the buffer closes, `timeout`
    /// elapses, or `token` cancels -- whichever comes first.
    pub async fn poll_timeout(
        &self,
        timeout: Duration,
        token: Option<&CancelToken>,
    ) -> DpResult<Option<T>> {
        match tokio::time::timeout(timeout, self.take(token)).await {
            Ok(result) => result,
            Err(_) => Err(DpError::Timeout),
        }
    }

    /// Blocks until an item is available or the buffer reaches `Closed`.
    /// Returns `Ok(None)` exactly once, at the moment a `Draining` buffer
    /// empties and transitions to `Closed`.
    pub async fn take(&self, token: Option<&CancelToken>) -> DpResult<Option<T>> {
        loop {
            let mut guard = self.inner.lock();
            if let Some(result) = self.take_locked(&mut guard)? {
                return Ok(Some(result));
            }
            match guard.state {
                BufferState::Closed => return Ok(None),
                BufferState::Draining if guard.queue.is_empty() => {
                    self.set_state(&mut guard, BufferState::Closed);
                    return Ok(None);
                }
                _ => {
                    drop(guard);
                    cancellable(token, self.not_empty.notified()).await?;
                }
            }
        }
    }

    fn take_locked(&self, guard: &mut Inner<T>) -> DpResult<Option<T>> {
        if guard.state == BufferState::Closed && guard.queue.is_empty() {
            return Err(DpError::Closed);
        }
        if let Some(item) = guard.queue.pop_front() {
            self.not_full.notify_waiters();
            if guard.queue.is_empty() && guard.state == BufferState::Draining {
                self.set_state(guard, BufferState::Closed);
            }
            return Ok(Some(item));
        }
        Ok(None)
    }

    /// `Supplying -> Draining`, then waits for the queue to empty before the
    /// final `Draining -> Closed` transition (driven by [`Self::take`]).
    /// A no-op if the buffer is already `Closed`.
    pub async fn shutdown(&self, token: Option<&CancelToken>) -> DpResult<()> {
        {
            let mut guard = self.inner.lock();
            match guard.state {
                BufferState::Supplying => self.set_state(&mut guard, BufferState::Draining),
                BufferState::Draining | BufferState::Closed => {}
                BufferState::Inactive => return Err(DpError::state("Supplying", "Inactive")),
            }
        }
        self.await_empty(token).await
    }

    /// Discards any queued items and transitions directly to `Closed`.
    pub async fn shutdown_now(&self) {
        let mut guard = self.inner.lock();
        guard.queue.clear();
        self.set_state(&mut guard, BufferState::Closed);
        self.not_full.notify_waiters();
        self.not_empty.notify_waiters();
    }

    pub async fn await_ready(&self, token: Option<&CancelToken>) -> DpResult<()> {
        loop {
            {
                let guard = self.inner.lock();
                if guard.state == BufferState::Supplying {
                    return Ok(());
                }
                if guard.state == BufferState::Closed {
                    return Err(DpError::Closed);
                }
            }
            cancellable(token, self.state_changed.notified()).await?;
        }
    }

    pub async fn await_empty(&self, token: Option<&CancelToken>) -> DpResult<()> {
        loop {
            {
                let mut guard = self.inner.lock();
                if guard.queue.is_empty() {
                    if guard.state == BufferState::Draining {
                        self.set_state(&mut guard, BufferState::Closed);
                    }
                    return Ok(());
                }
            }
            cancellable(token, self.not_empty.notified()).await?;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
