//! Capture request payload stored in each queue slot.
//!
//! A [`SessionCaptureRequest`] is the primary record: a small header plus one
//! [`CaptureRequest`] per pipeline. Each capture request owns a trailing
//! [`StreamBufferRegion`] holding its [`StreamBufferInfo`] sub-items.
//!
//! Producers build detached records and hand them to the queue by reference;
//! the queue copies them into slots whose regions were allocated once, up
//! front, and are bound to that slot for the queue's lifetime.

use smallvec::SmallVec;

/// Maximum number of pipelines (capture requests) in one session request.
pub const MAX_PIPELINES_PER_SESSION: usize = 4;

/// Inline capacity for output buffers of a stream buffer entry.
pub const INLINE_OUTPUT_BUFFERS: usize = 8;

/// Inline capacity for input buffers of a stream buffer entry.
pub const INLINE_INPUT_BUFFERS: usize = 2;

/// Synchronization fence attached to a stream buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fence {
    /// Whether the fence carries a value.
    pub valid: bool,
    /// Native sync fd, `-1` when unused.
    pub native_fd: i32,
    /// Opaque fence object handle.
    pub handle: u64,
}

impl Fence {
    /// A fence backed by a native fd.
    pub fn native(fd: i32) -> Self {
        Self {
            valid: true,
            native_fd: fd,
            handle: 0,
        }
    }
}

/// Descriptor for one stream's buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    /// Stream the buffer belongs to.
    pub stream_id: u32,
    /// Buffer handle kind, opaque to the queue.
    pub buffer_type: u32,
    /// Opaque buffer handle.
    pub handle: u64,
    /// Backing fd, `-1` when unused.
    pub fd: i32,
    /// Buffer status code.
    pub status: i32,
    /// Fence to wait on before touching the buffer.
    pub acquire_fence: Fence,
    /// Fence signalled once the buffer is done.
    pub release_fence: Fence,
}

/// Input buffer with the port it feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputBufferInfo {
    /// Driver-level fence id.
    pub fence: u32,
    /// Port the buffer enters on.
    pub port_id: u32,
    /// Whether `fence` is a framework fence rather than a driver fence.
    pub is_chi_fence: bool,
    /// The buffer itself.
    pub buffer: StreamBuffer,
}

/// Sub-item: buffers for one batched frame of a capture request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBufferInfo {
    /// Frame sequence number.
    pub sequence_id: u32,
    /// Frame number as the framework submitted it.
    pub original_framework_number: u64,
    /// Output buffers.
    pub output_buffers: SmallVec<[StreamBuffer; INLINE_OUTPUT_BUFFERS]>,
    /// Input buffers (reprocess requests).
    pub input_buffers: SmallVec<[InputBufferInfo; INLINE_INPUT_BUFFERS]>,
}

impl StreamBufferInfo {
    /// Create an entry with no buffers attached.
    pub fn new(sequence_id: u32, original_framework_number: u64) -> Self {
        Self {
            sequence_id,
            original_framework_number,
            ..Self::default()
        }
    }

    /// Attach an output buffer.
    pub fn with_output(mut self, buffer: StreamBuffer) -> Self {
        self.output_buffers.push(buffer);
        self
    }

    /// Attach an input buffer.
    pub fn with_input(mut self, input: InputBufferInfo) -> Self {
        self.input_buffers.push(input);
        self
    }
}

/// Multi-pipeline synchronization data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiRequestData {
    /// Whether this request is part of a synchronized multi-pipeline capture.
    pub is_multi_request: bool,
    /// Sequence id shared by all pipelines of the capture.
    pub sync_sequence_id: u64,
    /// Which pipelines take part.
    pub active: [bool; MAX_PIPELINES_PER_SESSION],
}

/// Identity of the slot region a [`StreamBufferRegion`] was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RegionHome {
    pub(crate) queue: u64,
    pub(crate) slot: u32,
    pub(crate) pipeline: u32,
}

/// Trailing array of [`StreamBufferInfo`] entries for one capture request.
///
/// Regions created with [`StreamBufferRegion::new`] are detached and grow
/// freely. Regions inside a queue slot are bound to that slot: moving one
/// into another slot (by swapping or assignment through a handle) is detected
/// the next time the queue touches the slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBufferRegion {
    home: Option<RegionHome>,
    buffers: Vec<StreamBufferInfo>,
}

impl StreamBufferRegion {
    /// Create a detached, empty region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Region bound to a slot, with its storage reserved up front.
    pub(crate) fn bound(
        home: RegionHome,
        capacity: usize,
    ) -> Result<Self, std::collections::TryReserveError> {
        let mut buffers = Vec::new();
        buffers.try_reserve_exact(capacity)?;
        Ok(Self {
            home: Some(home),
            buffers,
        })
    }

    /// Whether the region belongs to a queue slot.
    pub fn is_bound(&self) -> bool {
        self.home.is_some()
    }

    pub(crate) fn home(&self) -> Option<RegionHome> {
        self.home
    }

    /// Append an entry.
    pub fn push(&mut self, info: StreamBufferInfo) {
        self.buffers.push(info);
    }

    /// Entries currently held.
    pub fn as_slice(&self) -> &[StreamBufferInfo] {
        &self.buffers
    }

    /// Mutable entries currently held.
    pub fn as_mut_slice(&mut self) -> &mut [StreamBufferInfo] {
        &mut self.buffers
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the region holds no entries.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Copy `src` over the current contents, reusing existing storage.
    pub(crate) fn copy_from(&mut self, src: &[StreamBufferInfo]) {
        self.buffers.truncate(src.len());
        let (reuse, append) = src.split_at(self.buffers.len());
        self.buffers.clone_from_slice(reuse);
        self.buffers.extend_from_slice(append);
    }
}

/// Per-pipeline capture request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Framework request id.
    pub request_id: u64,
    /// Driver sync id for the request.
    pub sync_id: u64,
    /// Number of batched frames, i.e. how many stream buffer entries the
    /// request carries.
    pub num_batched_frames: u32,
    /// Pipeline this request targets.
    pub pipeline_index: u32,
    /// Multi-pipeline capture data.
    pub multi_request: MultiRequestData,
    stream_buffers: StreamBufferRegion,
}

impl CaptureRequest {
    /// Create a request with no stream buffers.
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            ..Self::default()
        }
    }

    /// Set the driver sync id.
    pub fn with_sync_id(mut self, sync_id: u64) -> Self {
        self.sync_id = sync_id;
        self
    }

    /// Set the target pipeline.
    pub fn with_pipeline_index(mut self, pipeline_index: u32) -> Self {
        self.pipeline_index = pipeline_index;
        self
    }

    /// Set multi-pipeline data.
    pub fn with_multi_request(mut self, multi_request: MultiRequestData) -> Self {
        self.multi_request = multi_request;
        self
    }

    /// Append a stream buffer entry and count it as a batched frame.
    pub fn with_stream_buffer(mut self, info: StreamBufferInfo) -> Self {
        self.stream_buffers.push(info);
        self.num_batched_frames += 1;
        self
    }

    pub(crate) fn with_region(region: StreamBufferRegion) -> Self {
        Self {
            stream_buffers: region,
            ..Self::default()
        }
    }

    /// Number of stream buffer entries this request claims.
    pub fn batched_output_count(&self) -> usize {
        self.num_batched_frames as usize
    }

    /// The claimed stream buffer entries that are actually present.
    pub fn stream_buffers(&self) -> &[StreamBufferInfo] {
        let held = self.stream_buffers.as_slice();
        &held[..self.batched_output_count().min(held.len())]
    }

    /// The trailing region itself.
    pub fn region(&self) -> &StreamBufferRegion {
        &self.stream_buffers
    }

    /// Mutable access to the trailing region.
    pub fn region_mut(&mut self) -> &mut StreamBufferRegion {
        &mut self.stream_buffers
    }

    /// Copy scalar fields and the first `count` stream buffer entries from
    /// `src`, keeping this request's own region storage.
    pub(crate) fn copy_from(&mut self, src: &CaptureRequest, count: usize) {
        self.request_id = src.request_id;
        self.sync_id = src.sync_id;
        self.num_batched_frames = src.num_batched_frames;
        self.pipeline_index = src.pipeline_index;
        self.multi_request = src.multi_request;
        self.stream_buffers
            .copy_from(&src.stream_buffers.as_slice()[..count]);
    }
}

/// Primary record: one capture request per participating pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCaptureRequest {
    num_requests: usize,
    requests: Vec<CaptureRequest>,
}

impl SessionCaptureRequest {
    /// Create an empty session request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a capture request.
    pub fn with_request(mut self, request: CaptureRequest) -> Self {
        self.push(request);
        self
    }

    /// Append a capture request.
    ///
    /// Entries past `MAX_PIPELINES_PER_SESSION` are kept here but rejected
    /// by the queue on enqueue.
    pub fn push(&mut self, request: CaptureRequest) {
        if self.num_requests < self.requests.len() {
            self.requests[self.num_requests] = request;
        } else {
            self.requests.push(request);
        }
        self.num_requests += 1;
    }

    /// Number of capture requests in the record.
    pub fn num_requests(&self) -> usize {
        self.num_requests
    }

    /// The capture requests in the record.
    pub fn requests(&self) -> &[CaptureRequest] {
        &self.requests[..self.num_requests]
    }

    /// Mutable capture requests in the record.
    pub fn requests_mut(&mut self) -> &mut [CaptureRequest] {
        &mut self.requests[..self.num_requests]
    }

    /// First request id in the record, if any.
    pub fn first_request_id(&self) -> Option<u64> {
        self.requests().first().map(|r| r.request_id)
    }

    pub(crate) fn from_slots(requests: Vec<CaptureRequest>) -> Self {
        Self {
            num_requests: 0,
            requests,
        }
    }

    pub(crate) fn set_num_requests(&mut self, num_requests: usize) {
        debug_assert!(num_requests <= self.requests.len());
        self.num_requests = num_requests;
    }

    /// All pipeline entries, including ones past `num_requests`.
    pub(crate) fn entries(&self) -> &[CaptureRequest] {
        &self.requests
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [CaptureRequest] {
        &mut self.requests
    }
}
