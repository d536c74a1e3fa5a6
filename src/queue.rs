//! Blocking, in-order capture request queue.
//!
//! One mutex guards the ring and all slot flags; three condition variables
//! wake enqueue waiters (`not_full`), dequeue waiters (`not_empty`) and
//! flushers waiting for the queue to drain (`drained`).

use core::fmt;
use core::ops::Deref;

use tracing::{debug, info, warn};

use crate::cancel::Recovery;
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::request::{CaptureRequest, SessionCaptureRequest};
use crate::ring::{QueueState, QueueStats};
use crate::slot::{self, SlotArena};
use crate::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};

/// Bounded FIFO of [`SessionCaptureRequest`] records backed by a fixed slot arena.
///
/// Producers copy records in with [`enqueue`](Self::enqueue) or
/// [`enqueue_wait`](Self::enqueue_wait). The consumer receives a
/// [`RequestHandle`] pointing at the slot itself (no copy back) and returns
/// it with [`release`](Self::release) or by dropping it.
///
/// # Example
///
/// ```rust
/// use capture_queue::{CaptureQueue, CaptureRequest, SessionCaptureRequest, StreamBufferInfo};
///
/// let queue = CaptureQueue::create(4, 2).unwrap();
/// let request = SessionCaptureRequest::new().with_request(
///     CaptureRequest::new(1).with_stream_buffer(StreamBufferInfo::new(0, 1)),
/// );
/// queue.enqueue(&request).unwrap();
///
/// let handle = queue.dequeue().unwrap().expect("one record queued");
/// assert_eq!(handle.first_request_id(), Some(1));
/// queue.release(handle).unwrap();
/// ```
pub struct CaptureQueue {
    name: String,
    arena: SlotArena,
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    drained: Condvar,
}

impl CaptureQueue {
    /// Create an empty queue of `capacity` slots, each reserving
    /// `stream_buffers_per_request` stream buffer entries per pipeline.
    pub fn create(capacity: usize, stream_buffers_per_request: usize) -> Result<Self> {
        Self::with_config(QueueConfig::new(capacity, stream_buffers_per_request))
    }

    /// Create a queue from a full configuration.
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;

        let arena = SlotArena::new(config.capacity, config.stream_buffers_per_request)?;
        let state = QueueState::new(config.capacity, config.created_as)?;
        let footprint = slot::slot_footprint(config.stream_buffers_per_request);

        debug!(
            queue = %config.name,
            capacity = config.capacity,
            stream_buffers_per_request = config.stream_buffers_per_request,
            slot_footprint = footprint,
            arena_bytes = footprint.saturating_mul(config.capacity),
            created_as = ?config.created_as,
            "capture queue created"
        );

        Ok(Self {
            name: config.name,
            arena,
            state: Mutex::new(state),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            drained: Condvar::new(),
        })
    }

    /// Queue name, as used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Stream buffer entries reserved per capture request.
    pub fn stream_buffers_per_request(&self) -> usize {
        self.arena.stream_buffers_per_request()
    }

    /// Bytes accounted to each slot.
    pub fn slot_footprint(&self) -> usize {
        slot::slot_footprint(self.stream_buffers_per_request())
    }

    // Lock poisoning is ignored: state is consistent between operations.
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, QueueState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub(crate) fn arena(&self) -> &SlotArena {
        &self.arena
    }

    fn wait<'a>(
        condvar: &Condvar,
        guard: MutexGuard<'a, QueueState>,
    ) -> MutexGuard<'a, QueueState> {
        condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `request` into the tail slot without blocking.
    ///
    /// Fails with [`QueueError::Failed`] when the tail slot is still in use.
    pub fn enqueue(&self, request: &SessionCaptureRequest) -> Result<()> {
        let mut state = self.lock();
        state.enqueue_core(&self.arena, request)?;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Copy `request` into the tail slot, blocking while the queue is full.
    ///
    /// If [`cancel_wait`](Self::cancel_wait) is in effect the call returns
    /// without enqueuing: [`QueueError::Timeout`] under
    /// [`Recovery::InProgress`], [`QueueError::Failed`] otherwise. A record
    /// the queue rejects is reported once, not retried, and the free slot is
    /// offered to the next blocked producer.
    pub fn enqueue_wait(&self, request: &SessionCaptureRequest, recovery: Recovery) -> Result<()> {
        let mut state = self.lock();

        while !state.cancel.full_wait_cancelled() && !state.can_enqueue() {
            state = Self::wait(&self.not_full, state);
        }

        if state.cancel.full_wait_cancelled() {
            if recovery == Recovery::InProgress {
                info!(queue = %self.name, "recovery in progress, enqueue wait returns timeout");
            }
            return Err(recovery.cancelled_error());
        }

        if let Err(err) = state.enqueue_core(&self.arena, request) {
            // This waiter may have taken the release wakeup; hand it on.
            if state.can_enqueue() {
                self.not_full.notify_one();
            }
            return Err(err);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the head record without blocking.
    ///
    /// `Ok(None)` when the queue is empty. A corrupt head slot yields
    /// [`QueueError::InvalidPointer`] and stays at the head.
    pub fn dequeue(&self) -> Result<Option<RequestHandle<'_>>> {
        let mut state = self.lock();
        let result = state.dequeue_core(&self.arena);
        let drained = state.is_empty();
        drop(state);

        // Flushers are woken after the lock is dropped on this path.
        if drained {
            self.drained.notify_all();
        }

        Ok(result?.map(|slot| RequestHandle { queue: self, slot }))
    }

    /// Take the head record, blocking while the queue is empty.
    ///
    /// Returns `None` once [`cancel_wait`](Self::cancel_wait) is in effect.
    /// A corrupt head slot is never skipped: the caller waits until it is
    /// cancelled.
    pub fn dequeue_wait(&self) -> Option<RequestHandle<'_>> {
        let mut state = self.lock();

        loop {
            while !state.cancel.empty_wait_cancelled() && state.is_empty() {
                state = Self::wait(&self.not_empty, state);
            }

            if state.cancel.empty_wait_cancelled() {
                return None;
            }

            match state.dequeue_core(&self.arena) {
                Ok(Some(slot)) => {
                    if state.is_empty() {
                        self.drained.notify_all();
                    }
                    return Some(RequestHandle { queue: self, slot });
                }
                Ok(None) => {}
                // Park instead of spinning on the lock so cancel_wait can get in.
                Err(_) => state = Self::wait(&self.not_empty, state),
            }
        }
    }

    /// Return a dequeued record's slot to the queue.
    pub fn release(&self, handle: RequestHandle<'_>) -> Result<()> {
        if !core::ptr::eq(handle.queue, self) {
            return Err(QueueError::InvalidArgument(format!(
                "handle for slot {} belongs to queue {}",
                handle.slot,
                handle.queue.name()
            )));
        }
        let slot = handle.into_slot();
        self.release_slot(slot)
    }

    fn release_slot(&self, slot: usize) -> Result<()> {
        let mut state = self.lock();
        state.release_core(slot)?;

        if state.can_enqueue() {
            self.not_full.notify_one();
        }
        if state.is_empty() {
            self.drained.notify_all();
        }
        Ok(())
    }

    /// Block until every queued record has been dequeued.
    pub fn wait_empty(&self) {
        let mut state = self.lock();
        while !state.is_empty() {
            state = Self::wait(&self.drained, state);
        }
    }

    /// Wake and abort every blocked [`enqueue_wait`](Self::enqueue_wait) and
    /// [`dequeue_wait`](Self::dequeue_wait). Later waits fail immediately
    /// until [`enable_wait`](Self::enable_wait). Queued records are kept.
    pub fn cancel_wait(&self) {
        let mut state = self.lock();
        state.cancel.cancel_all();
        state.stats.cancellations += 1;
        self.not_full.notify_all();
        self.not_empty.notify_all();
        debug!(queue = %self.name, head = state.head(), tail = state.tail(), "waits cancelled");
    }

    /// Re-arm blocking waits after [`cancel_wait`](Self::cancel_wait).
    ///
    /// Takes the lock, so it is safe to call while waiters exist; a waiter
    /// that has not yet observed the cancellation will keep waiting.
    pub fn enable_wait(&self) {
        let mut state = self.lock();
        state.cancel.enable_all();
        debug!(queue = %self.name, "waits enabled");
    }

    /// Whether waits are currently cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancel.any()
    }

    /// Whether no record is waiting to be dequeued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether the tail slot is free.
    pub fn can_enqueue(&self) -> bool {
        self.lock().can_enqueue()
    }

    /// Records enqueued and not yet dequeued.
    pub fn len(&self) -> usize {
        self.lock().pending()
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }
}

impl fmt::Debug for CaptureQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CaptureQueue");
        s.field("name", &self.name).field("capacity", &self.capacity());
        match self.try_lock() {
            Some(state) => s
                .field("head", &state.head())
                .field("tail", &state.tail())
                .field("cancelled", &state.cancel.any()),
            None => s.field("state", &"<locked>"),
        };
        s.finish()
    }
}

/// A dequeued record, lent out until released.
///
/// Dereferences to the slot's own [`SessionCaptureRequest`]. Dropping the
/// handle releases the slot; [`CaptureQueue::release`] does the same and
/// reports errors.
///
/// Mutable access stops at the capture requests themselves: the record's
/// pipeline entries belong to the slot and cannot be replaced or appended to.
///
/// ```compile_fail
/// use capture_queue::{CaptureQueue, CaptureRequest, SessionCaptureRequest};
///
/// let queue = CaptureQueue::create(1, 1).unwrap();
/// queue.enqueue(&SessionCaptureRequest::new().with_request(CaptureRequest::new(1))).unwrap();
/// let mut handle = queue.dequeue().unwrap().unwrap();
/// *handle = SessionCaptureRequest::new();
/// ```
///
/// ```compile_fail
/// use capture_queue::{CaptureQueue, CaptureRequest, SessionCaptureRequest};
///
/// let queue = CaptureQueue::create(1, 1).unwrap();
/// queue.enqueue(&SessionCaptureRequest::new().with_request(CaptureRequest::new(1))).unwrap();
/// let mut handle = queue.dequeue().unwrap().unwrap();
/// handle.push(CaptureRequest::new(2));
/// ```
pub struct RequestHandle<'q> {
    queue: &'q CaptureQueue,
    slot: usize,
}

impl<'q> RequestHandle<'q> {
    /// Index of the slot holding the record.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Mutable capture requests of the lent record.
    pub fn requests_mut(&mut self) -> &mut [CaptureRequest] {
        // SAFETY: the slot was dequeued and not released, so this handle is
        // its only user, and `&mut self` makes this the only borrow.
        unsafe { self.queue.arena.payload_mut(self.slot) }.requests_mut()
    }

    /// Release the slot back to its queue.
    pub fn release(self) -> Result<()> {
        let queue = self.queue;
        queue.release(self)
    }

    fn into_slot(self) -> usize {
        let slot = self.slot;
        core::mem::forget(self);
        slot
    }
}

impl Deref for RequestHandle<'_> {
    type Target = SessionCaptureRequest;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the slot was dequeued and not released, so this handle is
        // its only user; enqueue skips in-use slots and dequeue/dump only
        // read slots between head and tail.
        unsafe { self.queue.arena.payload(self.slot) }
    }
}

impl Drop for RequestHandle<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.queue.release_slot(self.slot) {
            warn!(queue = %self.queue.name, slot = self.slot, %err, "dropped handle failed to release");
        }
    }
}

impl fmt::Debug for RequestHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("queue", &self.queue.name)
            .field("slot", &self.slot)
            .field("request", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreatedAs;
    use crate::request::{CaptureRequest, StreamBufferInfo};

    fn record(id: u64) -> SessionCaptureRequest {
        SessionCaptureRequest::new().with_request(
            CaptureRequest::new(id).with_stream_buffer(StreamBufferInfo::new(id as u32, id)),
        )
    }

    #[test]
    fn drop_releases_slot() {
        let queue = CaptureQueue::create(1, 1).unwrap();
        queue.enqueue(&record(1)).unwrap();
        {
            let handle = queue.dequeue().unwrap().unwrap();
            assert_eq!(handle.slot(), 0);
            assert!(!queue.can_enqueue());
        }
        assert!(queue.can_enqueue());
        assert_eq!(queue.stats().released, 1);
    }

    #[test]
    fn release_rejects_foreign_handle() {
        let a = CaptureQueue::create(2, 1).unwrap();
        let b = CaptureQueue::create(2, 1).unwrap();
        a.enqueue(&record(1)).unwrap();
        let handle = a.dequeue().unwrap().unwrap();
        assert!(matches!(
            b.release(handle),
            Err(QueueError::InvalidArgument(_))
        ));
        // The rejected handle was dropped, which released it on its own queue.
        assert_eq!(a.stats().released, 1);
        assert!(a.is_empty());
    }

    #[test]
    fn corrupt_head_parks_dequeue_wait_until_cancel() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let queue = Arc::new(CaptureQueue::create(3, 1).unwrap());
        queue.enqueue(&record(1)).unwrap();
        unsafe {
            let head = queue.arena.payload_mut(0);
            let stray = queue.arena.payload_mut(2);
            core::mem::swap(
                head.entries_mut()[0].region_mut(),
                stray.entries_mut()[0].region_mut(),
            );
        }
        assert!(matches!(queue.dequeue(), Err(QueueError::InvalidPointer(_))));

        let q = queue.clone();
        let waiter = thread::spawn(move || q.dequeue_wait().map(|h| h.slot()));
        thread::sleep(Duration::from_millis(50));
        queue.cancel_wait();
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(queue.len(), 1);
        assert!(queue.stats().corrupt_heads >= 1);
    }

    #[test]
    fn created_full_drains_with_empty_payloads() {
        let queue =
            CaptureQueue::with_config(QueueConfig::new(2, 1).created_as(CreatedAs::Full)).unwrap();
        assert_eq!(queue.len(), 2);
        let first = queue.dequeue().unwrap().unwrap();
        assert_eq!(first.num_requests(), 0);
        drop(first);
        assert!(queue.can_enqueue());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn debug_output_mentions_indices() {
        let queue = CaptureQueue::create(2, 1).unwrap();
        let text = format!("{queue:?}");
        assert!(text.contains("head: 0"));
        let _guard = queue.lock();
        assert!(format!("{queue:?}").contains("<locked>"));
    }
}
