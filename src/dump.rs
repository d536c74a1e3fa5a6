//! Post-mortem dump of queued records.

use std::io::{self, Write};

use tracing::warn;

use crate::queue::CaptureQueue;
use crate::request::{CaptureRequest, Fence, StreamBuffer, StreamBufferInfo};

fn line<W: Write>(sink: &mut W, indent: usize, args: std::fmt::Arguments<'_>) -> io::Result<()> {
    writeln!(sink, "{:indent$}{}", "", args, indent = indent)
}

fn fence(f: &Fence) -> String {
    format!(
        "{{ valid = {}, nativeFence = {}, handle = {:#x} }}",
        f.valid, f.native_fd, f.handle
    )
}

fn buffer<W: Write>(sink: &mut W, indent: usize, b: &StreamBuffer) -> io::Result<()> {
    line(
        sink,
        indent,
        format_args!(
            "stream = {}, buffer = {{ type = {}, handle = {:#x}, fd = {}, bufferStatus = {} }}",
            b.stream_id, b.buffer_type, b.handle, b.fd, b.status
        ),
    )?;
    line(
        sink,
        indent,
        format_args!(
            "acquireFence = {} releaseFence = {}",
            fence(&b.acquire_fence),
            fence(&b.release_fence)
        ),
    )
}

fn stream_buffer<W: Write>(
    sink: &mut W,
    indent: usize,
    i: usize,
    info: &StreamBufferInfo,
) -> io::Result<()> {
    line(
        sink,
        indent,
        format_args!(
            "streamBuffer_{i}, sequenceId = {}, originalFrameworkNumber = {}",
            info.sequence_id, info.original_framework_number
        ),
    )?;
    for (j, out) in info.output_buffers.iter().enumerate() {
        line(sink, indent + 2, format_args!("outputBuffer_{j}"))?;
        buffer(sink, indent + 4, out)?;
    }
    for (j, input) in info.input_buffers.iter().enumerate() {
        line(sink, indent + 2, format_args!("inputBufferInfo_{j}"))?;
        line(
            sink,
            indent + 4,
            format_args!(
                "fence = {:#010x}, port = {}, isChiFence = {}",
                input.fence, input.port_id, input.is_chi_fence
            ),
        )?;
        buffer(sink, indent + 4, &input.buffer)?;
    }
    Ok(())
}

fn capture_request<W: Write>(sink: &mut W, indent: usize, req: &CaptureRequest) -> io::Result<()> {
    line(
        sink,
        indent,
        format_args!(
            "requestId = {}, syncId = {}, numBatchedFrames = {}, pipelineIndex = {}, isMultiRequest = {}",
            req.request_id,
            req.sync_id,
            req.num_batched_frames,
            req.pipeline_index,
            req.multi_request.is_multi_request
        ),
    )?;
    for (i, info) in req.stream_buffers().iter().enumerate() {
        stream_buffer(sink, indent + 2, i, info)?;
    }
    if req.multi_request.is_multi_request {
        let active: Vec<usize> = req
            .multi_request
            .active
            .iter()
            .enumerate()
            .filter_map(|(p, on)| on.then_some(p))
            .collect();
        line(
            sink,
            indent + 2,
            format_args!(
                "multiRequest syncSequenceId = {}, activePipelines = {:?}",
                req.multi_request.sync_sequence_id, active
            ),
        )?;
    }
    Ok(())
}

impl CaptureQueue {
    /// Write every queued record to `sink`, indented by `indent` spaces.
    ///
    /// Uses a try-lock: if the queue lock is held (possibly by a hung
    /// thread) the dump notes it and stops instead of blocking. Never
    /// changes queue state.
    pub fn dump_state<W: Write>(&self, sink: &mut W, indent: usize) -> io::Result<()> {
        let Some(state) = self.try_lock() else {
            warn!(queue = %self.name(), "queue lock busy, skipping state dump");
            line(sink, indent, format_args!("lockAcquireStatus = \"busy\""))?;
            return line(
                sink,
                indent,
                format_args!("WARNING: lock busy, stopping dump of {}", self.name()),
            );
        };
        line(sink, indent, format_args!("lockAcquireStatus = \"acquired\""))?;

        let (head, tail) = (state.head(), state.tail());
        if state.is_empty() {
            return line(
                sink,
                indent,
                format_args!("{} is empty: head = {head}, tail = {tail}", self.name()),
            );
        }

        let capacity = state.capacity();
        line(
            sink,
            indent,
            format_args!(
                "{}: capacity = {capacity}, head = {head}, tail = {tail}, pending = {}, cancelled = {}",
                self.name(),
                state.pending(),
                state.cancel.any()
            ),
        )?;

        for offset in 0..state.pending() {
            let slot = (head + offset) % capacity;
            let desc = state.descriptor(slot);
            line(
                sink,
                indent,
                format_args!("Slot = {}, inUse = {}", desc.index, desc.in_use()),
            )?;
            if !desc.in_use() {
                continue;
            }
            // SAFETY: slots between head and tail are not lent to any
            // handle, and the lock is held.
            let payload = unsafe { self.arena().payload(slot) };
            for req in payload.requests() {
                capture_request(sink, indent + 2, req)?;
            }
        }
        Ok(())
    }
}
