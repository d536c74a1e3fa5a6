//! Ring index arithmetic and the unlocked enqueue/dequeue/release primitives.
//!
//! Everything here runs with the queue lock held. There is no element count:
//! `head == tail` means empty or full, told apart by the state of that one
//! slot. A slot is in use while queued or lent; only a queued head makes the
//! queue non-empty, so a lent slot is never handed out twice.

use tracing::error;

use crate::cancel::CancelFlags;
use crate::config::CreatedAs;
use crate::error::{QueueError, Result};
use crate::request::{SessionCaptureRequest, MAX_PIPELINES_PER_SESSION};
use crate::slot::{self, SlotArena, SlotDescriptor, SlotState, SLOT_CANARY};

/// Counters kept alongside the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Records accepted by enqueue.
    pub enqueued: u64,
    /// Records handed out by dequeue.
    pub dequeued: u64,
    /// Slots returned by release.
    pub released: u64,
    /// Enqueues refused because the tail slot was in use.
    pub rejected: u64,
    /// Dequeue attempts that found a corrupt head slot.
    pub corrupt_heads: u64,
    /// Calls to `cancel_wait`.
    pub cancellations: u64,
}

/// Lock-protected queue state.
pub(crate) struct QueueState {
    descriptors: Box<[SlotDescriptor]>,
    head: usize,
    tail: usize,
    pub(crate) cancel: CancelFlags,
    pub(crate) stats: QueueStats,
}

impl QueueState {
    pub(crate) fn new(capacity: usize, created_as: CreatedAs) -> Result<Self> {
        let initial = match created_as {
            CreatedAs::Empty => SlotState::Free,
            CreatedAs::Full => SlotState::Queued,
        };
        Ok(Self {
            descriptors: slot::descriptors(capacity, initial)?,
            head: 0,
            tail: 0,
            cancel: CancelFlags::default(),
            stats: QueueStats::default(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.descriptors.len()
    }

    pub(crate) fn head(&self) -> usize {
        self.head
    }

    pub(crate) fn tail(&self) -> usize {
        self.tail
    }

    pub(crate) fn descriptor(&self, slot: usize) -> &SlotDescriptor {
        &self.descriptors[slot]
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }

    /// The tail slot is free.
    pub(crate) fn can_enqueue(&self) -> bool {
        !self.descriptors[self.tail].in_use()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail && self.descriptors[self.head].state != SlotState::Queued
    }

    /// Number of enqueued, not yet dequeued records.
    pub(crate) fn pending(&self) -> usize {
        if self.head == self.tail {
            if self.descriptors[self.head].state == SlotState::Queued {
                self.capacity()
            } else {
                0
            }
        } else {
            (self.tail + self.capacity() - self.head) % self.capacity()
        }
    }

    /// Copy `src` into the tail slot and publish it.
    ///
    /// Everything is validated before the slot is touched, so a rejected
    /// record leaves the slot exactly as it was. Returns the slot written.
    pub(crate) fn enqueue_core(
        &mut self,
        arena: &SlotArena,
        src: &SessionCaptureRequest,
    ) -> Result<usize> {
        if !self.can_enqueue() {
            self.stats.rejected += 1;
            return Err(QueueError::Failed("queue is full"));
        }

        let slot = self.tail;
        let count = src.num_requests();
        if count > MAX_PIPELINES_PER_SESSION {
            return Err(QueueError::InvalidArgument(format!(
                "{count} capture requests exceed the per-session maximum of {MAX_PIPELINES_PER_SESSION}"
            )));
        }

        // SAFETY: the tail slot is not in use, so no handle holds it and no
        // other path reads it; we hold the lock.
        let dst = unsafe { arena.payload_mut(slot) };

        if let Err(err) = arena.check_regions(slot, dst, count) {
            error!(slot, %err, "slot region corrupted, refusing enqueue");
            return Err(err);
        }

        let limit = arena.stream_buffers_per_request();
        for (pipeline, request) in src.requests().iter().enumerate() {
            let claimed = request.batched_output_count();
            let held = request.region().len();
            if claimed > limit || claimed > held {
                error!(
                    slot,
                    pipeline, claimed, held, limit, "capture request stream buffer count out of range"
                );
                return Err(QueueError::InvalidArgument(format!(
                    "pipeline {pipeline} claims {claimed} stream buffers, carries {held}, slot holds {limit}"
                )));
            }
        }

        for (entry, request) in dst.entries_mut().iter_mut().zip(src.requests()) {
            entry.copy_from(request, request.batched_output_count());
        }
        dst.set_num_requests(count);

        self.descriptors[slot].state = SlotState::Queued;
        self.tail = self.next(slot);
        self.stats.enqueued += 1;
        Ok(slot)
    }

    /// Take the head slot. `Ok(None)` when empty.
    ///
    /// A head slot whose regions fail validation is left in place: the
    /// error is returned and `head` does not move.
    pub(crate) fn dequeue_core(&mut self, arena: &SlotArena) -> Result<Option<usize>> {
        if self.is_empty() {
            return Ok(None);
        }

        let slot = self.head;
        // SAFETY: the head slot sits between head and tail, so it has not
        // been lent to any handle; we hold the lock.
        let payload = unsafe { arena.payload(slot) };
        if let Err(err) = arena.check_regions(slot, payload, payload.num_requests()) {
            self.stats.corrupt_heads += 1;
            error!(slot, %err, "head slot corrupted, not dequeuing");
            return Err(err);
        }

        debug_assert_eq!(self.descriptors[slot].state, SlotState::Queued);
        self.descriptors[slot].state = SlotState::Lent;
        self.head = self.next(slot);
        self.stats.dequeued += 1;
        Ok(Some(slot))
    }

    /// Return a dequeued slot for reuse.
    pub(crate) fn release_core(&mut self, slot: usize) -> Result<()> {
        let Some(desc) = self.descriptors.get_mut(slot) else {
            return Err(QueueError::InvalidArgument(format!(
                "slot {slot} out of range"
            )));
        };

        debug_assert_eq!(desc.signature, SLOT_CANARY, "slot {slot} signature clobbered");
        if desc.signature != SLOT_CANARY || desc.index as usize != slot {
            error!(
                slot,
                index = desc.index,
                signature = desc.signature,
                "released slot failed signature check"
            );
            return Err(QueueError::InvalidPointer(format!(
                "slot {slot} descriptor signature {:#010x}",
                desc.signature
            )));
        }

        if desc.state != SlotState::Lent {
            return Err(QueueError::InvalidArgument(format!(
                "slot {slot} released while {:?}",
                desc.state
            )));
        }

        desc.state = SlotState::Free;
        self.stats.released += 1;
        Ok(())
    }
}
