//! The host queue: synchronous inline execution
//!
//! The host back-end is single-threaded cooperative: `launch` validates,
//! resolves prerequisites, runs the kernel body on the calling thread, and
//! returns an event that is already terminal. All ordering is therefore
//! trivially sequential, which makes this queue the semantic reference for
//! the asynchronous device back-ends.
//!
//! A failed prerequisite never invokes the kernel body; the returned event
//! is born failed with `PrereqFailed` wrapping the prerequisite's root
//! cause.

use crate::memory::host_buffer;
use parking_lot::Mutex;
use prism_core::event::profile_now;
use prism_core::{
    plan_grid, BackendKind, BoundKernel, ComputeEvent, ComputeQueue, Error, EventCell, EventState,
    FillInit, MemoryHandle, ProfilingInfo, QueueState, Result, FILL_TO_END,
};
use std::sync::Arc;

pub struct HostQueue {
    state: Mutex<QueueState>,
}

impl HostQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::Open),
        })
    }

    /// Check prerequisites; `Some(event)` short-circuits the submission
    fn resolve_prereqs(
        &self,
        prereqs: &[Arc<dyn ComputeEvent>],
    ) -> Result<Option<Arc<dyn ComputeEvent>>> {
        for prereq in prereqs {
            if prereq.backend() != BackendKind::Host {
                return Err(Error::BackendMismatch {
                    expected: BackendKind::Host,
                    got: prereq.backend(),
                });
            }
        }
        for prereq in prereqs {
            // Host events are terminal by construction; a pending one can
            // only come from another thread mid-transition, so join it.
            let state = match prereq.state() {
                EventState::Pending => match prereq.wait() {
                    Ok(()) => EventState::Resolved,
                    Err(e) => EventState::Failed(e),
                },
                state => state,
            };
            let cause = match state {
                EventState::Resolved => continue,
                EventState::Failed(e) => e,
                EventState::Cancelled => Error::Cancelled,
                EventState::Pending => unreachable!("joined above"),
            };
            let failed: Arc<dyn ComputeEvent> =
                EventCell::failed(BackendKind::Host, Error::prereq(cause));
            return Ok(Some(failed));
        }
        Ok(None)
    }
}

impl ComputeQueue for HostQueue {
    fn backend(&self) -> BackendKind {
        BackendKind::Host
    }

    fn state(&self) -> QueueState {
        *self.state.lock()
    }

    #[tracing::instrument(skip_all, fields(op = op_name, kernel = bound.spec().name()))]
    fn launch(
        &self,
        op_name: &str,
        bound: &BoundKernel,
        grid: &[u32],
        prereqs: &[Arc<dyn ComputeEvent>],
    ) -> Result<Arc<dyn ComputeEvent>> {
        let queued = profile_now();
        *self.state.lock() = QueueState::Open;

        if let Some(failed) = self.resolve_prereqs(prereqs)? {
            tracing::debug!("prerequisite failed; kernel body skipped");
            return Ok(failed);
        }

        let mut ranges = plan_grid(bound.spec(), bound.env(), grid)?;

        let started = profile_now();
        let outcome = bound.invoke(&mut ranges);
        let ended = profile_now();

        let event = match outcome {
            Ok(()) => EventCell::resolved(BackendKind::Host),
            Err(e) => {
                tracing::debug!(error = %e, "kernel body failed");
                EventCell::failed(BackendKind::Host, e)
            }
        };
        event.set_profiling(ProfilingInfo {
            queued: Some(queued),
            submitted: Some(queued),
            started: Some(started),
            ended: Some(ended),
        });
        let event: Arc<dyn ComputeEvent> = event;
        Ok(event)
    }

    #[tracing::instrument(skip_all, fields(op = op_name))]
    fn fill(
        &self,
        op_name: &str,
        region: &MemoryHandle,
        init: FillInit,
        start_offset_bytes: usize,
        len_bytes: isize,
        prereqs: &[Arc<dyn ComputeEvent>],
    ) -> Result<Arc<dyn ComputeEvent>> {
        *self.state.lock() = QueueState::Open;

        if let Some(failed) = self.resolve_prereqs(prereqs)? {
            return Ok(failed);
        }

        let buffer = host_buffer(region.buffer())?;
        let len = if len_bytes == FILL_TO_END {
            region
                .len_bytes()
                .checked_sub(start_offset_bytes)
                .ok_or_else(|| {
                    Error::execution(format!(
                        "fill {op_name}: offset {start_offset_bytes} past region of {} bytes",
                        region.len_bytes()
                    ))
                })?
        } else if len_bytes < 0 {
            return Err(Error::execution(format!(
                "fill {op_name}: negative length {len_bytes}"
            )));
        } else {
            len_bytes as usize
        };
        if start_offset_bytes + len > region.len_bytes() {
            return Err(Error::execution(format!(
                "fill {op_name}: range {start_offset_bytes}..{} exceeds region of {} bytes",
                start_offset_bytes + len,
                region.len_bytes()
            )));
        }

        let offset = region.offset() + start_offset_bytes;
        match init {
            FillInit::Zero => buffer.write(offset, &vec![0u8; len])?,
            FillInit::Byte(b) => buffer.write(offset, &vec![b; len])?,
            FillInit::Pattern(pattern) => {
                if pattern.is_empty() || len % pattern.len() != 0 {
                    return Err(Error::execution(format!(
                        "fill {op_name}: {len} bytes is not a multiple of the {}-byte pattern",
                        pattern.len()
                    )));
                }
                let mut bytes = Vec::with_capacity(len);
                while bytes.len() < len {
                    bytes.extend_from_slice(&pattern);
                }
                buffer.write(offset, &bytes)?;
            }
        }
        let event: Arc<dyn ComputeEvent> = EventCell::resolved(BackendKind::Host);
        Ok(event)
    }

    fn flush(&self) {
        // Every submission already ran inline; there is nothing to push to
        // the device, and the queue stays in whatever state it was in.
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        *state = QueueState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_state_machine() {
        let queue = HostQueue::new();
        assert_eq!(queue.state(), QueueState::Open);
        queue.finish();
        assert_eq!(queue.state(), QueueState::Idle);
        // Idempotent on an empty queue.
        queue.finish();
        assert_eq!(queue.state(), QueueState::Idle);
        queue.flush();
        assert_eq!(queue.state(), QueueState::Idle);
    }
}
