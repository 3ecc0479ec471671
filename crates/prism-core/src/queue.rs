//! Queues: ordered submission of bound kernels
//!
//! A queue owns the order in which work reaches one device context.
//! Submissions on the same queue are observed in submission order; across
//! queues, only explicit prerequisite events create ordering. Submission-time
//! validation (grid arity, prerequisite back-end identity, grid alignment)
//! fails synchronously; anything that happens while the kernel runs is
//! reported through the returned event, never as a return value.
//!
//! Queue lifecycle: `Open -> Flushing -> Idle -> Open`. `finish()` drives the
//! queue to `Idle` and returns once every submitted event is terminal; a new
//! submission reopens it. Both `flush()` and `finish()` are no-ops on an
//! empty queue.

use crate::bind::BoundKernel;
use crate::error::Result;
use crate::event::ComputeEvent;
use crate::memory::{BackendKind, MemoryHandle};
use std::sync::Arc;

/// Queue lifecycle state
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueueState {
    /// Accepting submissions
    Open,
    /// Draining pending submissions to the device
    Flushing,
    /// Empty; every submitted event is terminal
    Idle,
}

/// How `fill` initializes a buffer range
#[derive(Clone, Debug)]
pub enum FillInit {
    /// Zero every byte
    Zero,
    /// Repeat a single byte
    Byte(u8),
    /// Repeat a byte pattern; the range length must be a multiple of the
    /// pattern length
    Pattern(Vec<u8>),
}

/// Length argument of `fill` meaning "to the end of the region"
pub const FILL_TO_END: isize = -1;

/// An ordered stream of work against one device context
pub trait ComputeQueue: Send + Sync {
    /// Back-end this queue submits to
    fn backend(&self) -> BackendKind;

    /// Current lifecycle state
    fn state(&self) -> QueueState;

    /// Launch a bound kernel over an N-dimensional grid
    ///
    /// `grid` carries the logical extent of each declared dimension and must
    /// have one entry per dimension. Prerequisites must belong to this
    /// queue's back-end. A failed prerequisite does not invoke the kernel
    /// body; the returned event fails with `PrereqFailed` carrying the root
    /// cause.
    ///
    /// # Errors
    ///
    /// Synchronous: `GridArityMismatch`, `GridMisalignment`,
    /// `BackendMismatch`. Runtime failures surface on the event.
    fn launch(
        &self,
        op_name: &str,
        bound: &BoundKernel,
        grid: &[u32],
        prereqs: &[Arc<dyn ComputeEvent>],
    ) -> Result<Arc<dyn ComputeEvent>>;

    /// Initialize a sub-range of a device buffer
    ///
    /// `len_bytes == FILL_TO_END` fills from `start_offset_bytes` to the end
    /// of the region.
    fn fill(
        &self,
        op_name: &str,
        region: &MemoryHandle,
        init: FillInit,
        start_offset_bytes: usize,
        len_bytes: isize,
        prereqs: &[Arc<dyn ComputeEvent>],
    ) -> Result<Arc<dyn ComputeEvent>>;

    /// Submit all queued work to the device without waiting
    fn flush(&self);

    /// Wait until the queue is empty and every submitted event is terminal
    fn finish(&self);
}
