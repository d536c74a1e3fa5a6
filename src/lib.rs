//! capture_queue - bounded, blocking, in-order queue for capture requests
//!
//! Hands [`SessionCaptureRequest`] records from producer threads to a single
//! dispatch thread. Storage is a fixed slot arena allocated once; records are
//! copied into slots on enqueue and lent to the consumer in place on dequeue.
//! Blocked waiters in either direction can be cancelled as a group and
//! re-armed later without touching queued records.
#![warn(missing_docs)]

mod cancel;
mod config;
mod dump;
mod error;
mod queue;
mod request;
mod ring;
mod slot;
mod sync;

pub use cancel::Recovery;
pub use config::{CreatedAs, QueueConfig};
pub use error::{QueueError, Result};
pub use queue::{CaptureQueue, RequestHandle};
pub use request::{
    CaptureRequest, Fence, InputBufferInfo, MultiRequestData, SessionCaptureRequest, StreamBuffer,
    StreamBufferInfo, StreamBufferRegion, INLINE_INPUT_BUFFERS, INLINE_OUTPUT_BUFFERS,
    MAX_PIPELINES_PER_SESSION,
};
pub use ring::QueueStats;
pub use slot::SLOT_CANARY;
