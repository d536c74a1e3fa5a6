//! Slot arena: fixed storage for every record the queue will ever hold.
//!
//! All slots are allocated once at construction and reused in place. Each
//! slot pairs a [`SlotDescriptor`] (kept under the queue lock) with a
//! payload cell holding a [`SessionCaptureRequest`] whose per-pipeline
//! stream buffer regions are pre-reserved and bound to the slot.

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{QueueError, Result};
use crate::request::{
    CaptureRequest, RegionHome, SessionCaptureRequest, StreamBufferInfo, StreamBufferRegion,
    MAX_PIPELINES_PER_SESSION,
};

/// Signature written into every descriptor at construction and checked on release.
pub const SLOT_CANARY: u32 = 0xCA3E_C0DE;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Occupancy of a slot.
///
/// `Queued` and `Lent` together are "in use": the slot cannot be enqueued
/// into. Only `Queued` slots can be dequeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free,
    Queued,
    Lent,
}

/// Per-slot metadata. Only read or written with the queue lock held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotDescriptor {
    pub(crate) index: u32,
    pub(crate) state: SlotState,
    pub(crate) signature: u32,
}

impl SlotDescriptor {
    fn new(index: u32, state: SlotState) -> Self {
        Self {
            index,
            state,
            signature: SLOT_CANARY,
        }
    }

    /// Holds a record that has not been released.
    pub(crate) fn in_use(&self) -> bool {
        self.state != SlotState::Free
    }
}

/// Build the descriptor table for `capacity` slots.
pub(crate) fn descriptors(capacity: usize, state: SlotState) -> Result<Box<[SlotDescriptor]>> {
    let mut table = Vec::new();
    table
        .try_reserve_exact(capacity)
        .map_err(|_| QueueError::NoMemory {
            bytes: capacity.saturating_mul(size_of::<SlotDescriptor>()),
        })?;
    table.extend((0..capacity).map(|slot| SlotDescriptor::new(slot as u32, state)));
    Ok(table.into_boxed_slice())
}

/// Bytes one slot accounts for: descriptor, primary record and the
/// trailing stream buffer entries of every pipeline.
///
/// Saturates at `usize::MAX` for sizings no allocation could satisfy.
pub(crate) fn slot_footprint(stream_buffers_per_request: usize) -> usize {
    let trailing = MAX_PIPELINES_PER_SESSION
        .saturating_mul(stream_buffers_per_request)
        .saturating_mul(size_of::<StreamBufferInfo>());
    (size_of::<SlotDescriptor>()
        + size_of::<SessionCaptureRequest>()
        + MAX_PIPELINES_PER_SESSION * size_of::<CaptureRequest>())
    .saturating_add(trailing)
}

/// Payload storage for all slots.
///
/// Access discipline (enforced by the queue, not by this type):
/// - a slot that is not in use is written only by the enqueue path, under the lock;
/// - a slot between head and tail is read only under the lock;
/// - a dequeued, unreleased slot belongs to exactly one `RequestHandle`.
pub(crate) struct SlotArena {
    id: u64,
    stream_buffers_per_request: usize,
    payloads: Box<[UnsafeCell<SessionCaptureRequest>]>,
}

// SAFETY: payload cells are only touched under the access discipline above,
// which never hands out aliasing mutable references across threads.
unsafe impl Sync for SlotArena {}

impl SlotArena {
    /// Allocate `capacity` slots, each with `stream_buffers_per_request`
    /// entries reserved for every pipeline.
    pub(crate) fn new(capacity: usize, stream_buffers_per_request: usize) -> Result<Self> {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        let no_memory = || QueueError::NoMemory {
            bytes: capacity.saturating_mul(slot_footprint(stream_buffers_per_request)),
        };

        let mut payloads = Vec::new();
        payloads.try_reserve_exact(capacity).map_err(|_| no_memory())?;

        for slot in 0..capacity {
            let mut entries = Vec::new();
            entries
                .try_reserve_exact(MAX_PIPELINES_PER_SESSION)
                .map_err(|_| no_memory())?;
            for pipeline in 0..MAX_PIPELINES_PER_SESSION {
                let home = RegionHome {
                    queue: id,
                    slot: slot as u32,
                    pipeline: pipeline as u32,
                };
                let region = StreamBufferRegion::bound(home, stream_buffers_per_request)
                    .map_err(|_| no_memory())?;
                entries.push(CaptureRequest::with_region(region));
            }
            payloads.push(UnsafeCell::new(SessionCaptureRequest::from_slots(entries)));
        }

        Ok(Self {
            id,
            stream_buffers_per_request,
            payloads: payloads.into_boxed_slice(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.payloads.len()
    }

    pub(crate) fn stream_buffers_per_request(&self) -> usize {
        self.stream_buffers_per_request
    }

    /// Home every region of `slot`/`pipeline` must carry.
    pub(crate) fn home(&self, slot: usize, pipeline: usize) -> RegionHome {
        RegionHome {
            queue: self.id,
            slot: slot as u32,
            pipeline: pipeline as u32,
        }
    }

    /// Check that `payload` still has its full set of pipeline entries and
    /// that the first `count` regions belong to `slot`.
    pub(crate) fn check_regions(
        &self,
        slot: usize,
        payload: &SessionCaptureRequest,
        count: usize,
    ) -> Result<()> {
        let entries = payload.entries().len();
        if entries != MAX_PIPELINES_PER_SESSION || count > entries {
            return Err(QueueError::InvalidPointer(format!(
                "slot {slot}: {entries} pipeline entries, {count} requested, expected {MAX_PIPELINES_PER_SESSION}"
            )));
        }
        for (pipeline, entry) in payload.entries().iter().take(count).enumerate() {
            let expected = self.home(slot, pipeline);
            if entry.region().home() != Some(expected) {
                return Err(QueueError::InvalidPointer(format!(
                    "slot {slot} pipeline {pipeline}: region home {:?}, expected {:?}",
                    entry.region().home(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Shared view of a slot's payload.
    ///
    /// # Safety
    ///
    /// No mutable reference to the same slot may be live.
    pub(crate) unsafe fn payload(&self, slot: usize) -> &SessionCaptureRequest {
        &*self.payloads[slot].get()
    }

    /// Exclusive view of a slot's payload.
    ///
    /// # Safety
    ///
    /// The caller must be the only party accessing the slot: either the
    /// enqueue path with the lock held on a slot not in use, or the single
    /// handle the slot is lent to.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self, slot: usize) -> &mut SessionCaptureRequest {
        &mut *self.payloads[slot].get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_carry_index_and_canary() {
        let table = descriptors(3, SlotState::Queued).unwrap();
        assert_eq!(table.len(), 3);
        for (i, desc) in table.iter().enumerate() {
            assert_eq!(desc.index as usize, i);
            assert!(desc.in_use());
            assert_eq!(desc.signature, SLOT_CANARY);
        }
    }

    #[test]
    fn regions_are_prewired_to_their_slot() {
        let arena = SlotArena::new(4, 2).unwrap();
        assert_eq!(arena.capacity(), 4);
        for slot in 0..4 {
            let payload = unsafe { arena.payload(slot) };
            assert_eq!(payload.num_requests(), 0);
            assert_eq!(payload.entries().len(), MAX_PIPELINES_PER_SESSION);
            arena
                .check_regions(slot, payload, MAX_PIPELINES_PER_SESSION)
                .unwrap();
        }
    }

    #[test]
    fn swapped_region_fails_check() {
        let arena = SlotArena::new(2, 1).unwrap();
        unsafe {
            let a = arena.payload_mut(0);
            let b = arena.payload_mut(1);
            core::mem::swap(a.entries_mut()[0].region_mut(), b.entries_mut()[0].region_mut());
        }
        let payload = unsafe { arena.payload(0) };
        assert!(matches!(
            arena.check_regions(0, payload, 1),
            Err(QueueError::InvalidPointer(_))
        ));
        // Pipelines past the checked count are ignored.
        assert!(arena.check_regions(0, payload, 0).is_ok());
    }

    #[test]
    fn replaced_record_fails_check() {
        let arena = SlotArena::new(2, 1).unwrap();
        unsafe {
            *arena.payload_mut(0) = SessionCaptureRequest::new();
        }
        let payload = unsafe { arena.payload(0) };
        assert!(matches!(
            arena.check_regions(0, payload, 0),
            Err(QueueError::InvalidPointer(_))
        ));
        assert!(matches!(
            arena.check_regions(0, payload, 1),
            Err(QueueError::InvalidPointer(_))
        ));
        // More pipelines than a slot holds never passes.
        let intact = unsafe { arena.payload(1) };
        assert!(matches!(
            arena.check_regions(1, intact, MAX_PIPELINES_PER_SESSION + 1),
            Err(QueueError::InvalidPointer(_))
        ));
    }

    #[test]
    fn footprint_saturates() {
        assert_eq!(slot_footprint(usize::MAX), usize::MAX);
        assert!(slot_footprint(1) < slot_footprint(2));
    }

    #[test]
    fn oversized_reservation_reports_no_memory() {
        assert!(matches!(
            SlotArena::new(1, usize::MAX / 8),
            Err(QueueError::NoMemory { bytes: usize::MAX })
        ));
    }

    #[test]
    fn arenas_have_distinct_homes() {
        let a = SlotArena::new(1, 1).unwrap();
        let b = SlotArena::new(1, 1).unwrap();
        assert_ne!(a.home(0, 0), b.home(0, 0));
    }
}
