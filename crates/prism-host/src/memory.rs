//! Host buffer storage
//!
//! Host buffers are plain heap allocations with a stable base address and a
//! cache-line-friendly alignment so any registered element type can be
//! viewed in place. The buffer table maps incrementing ids to shared
//! buffers; freeing drops the table's reference while outstanding handles
//! and pins keep the storage alive.
//!
//! Mutation goes through `&self` raw-pointer accessors because mapped ranges
//! hand kernel bodies direct pointers into the allocation. The host queue
//! executes kernels inline on the calling thread, which serializes every
//! access for the duration of a call.

use parking_lot::RwLock;
use prism_core::{BackendKind, DeviceBuffer, Error, Result};
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::any::Any;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Alignment of host allocations; enough for every primitive element type
const HOST_BUFFER_ALIGN: usize = 64;

/// One host-owned allocation
pub struct HostBuffer {
    id: u64,
    ptr: NonNull<u8>,
    len: usize,
}

// Access to the allocation is serialized by the host queue's inline
// execution; the pointer itself is freely shareable.
unsafe impl Send for HostBuffer {}
unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    fn new(id: u64, len: usize) -> Self {
        let layout = Self::layout(len);
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self { id, ptr, len }
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len.max(1), HOST_BUFFER_ALIGN).expect("host buffer layout")
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Read a byte range out of the buffer
    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check(offset, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Write a byte range into the buffer
    pub(crate) fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr().add(offset), data.len());
        }
        Ok(())
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(Error::execution(format!(
                "host buffer {}: range {offset}..{} exceeds {} bytes",
                self.id,
                offset.wrapping_add(len),
                self.len
            )));
        }
        Ok(())
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), Self::layout(self.len)) }
    }
}

impl DeviceBuffer for HostBuffer {
    fn backend(&self) -> BackendKind {
        BackendKind::Host
    }

    fn len_bytes(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Buffer table of one host context
pub(crate) struct BufferTable {
    buffers: RwLock<HashMap<u64, Arc<HostBuffer>>>,
    next_id: AtomicU64,
}

impl BufferTable {
    pub(crate) fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate(&self, len: usize) -> Arc<HostBuffer> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer = Arc::new(HostBuffer::new(id, len));
        self.buffers.write().insert(id, Arc::clone(&buffer));
        buffer
    }

    pub(crate) fn free(&self, id: u64) -> Result<()> {
        if self.buffers.write().remove(&id).is_none() {
            return Err(Error::execution(format!("host buffer {id} is not in the table")));
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.read().len()
    }
}

/// Recover the host buffer behind a device-agnostic handle
pub(crate) fn host_buffer(buffer: &Arc<dyn DeviceBuffer>) -> Result<&HostBuffer> {
    buffer
        .as_any()
        .downcast_ref::<HostBuffer>()
        .ok_or(Error::BackendMismatch {
            expected: BackendKind::Host,
            got: buffer.backend(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_zeroed_and_aligned() {
        let table = BufferTable::new();
        let buffer = table.allocate(128);
        assert_eq!(buffer.len_bytes(), 128);
        assert_eq!(buffer.as_ptr() as usize % HOST_BUFFER_ALIGN, 0);

        let mut out = vec![0xFFu8; 128];
        buffer.read(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_write_round_trip() {
        let table = BufferTable::new();
        let buffer = table.allocate(16);
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        buffer.read(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let table = BufferTable::new();
        let buffer = table.allocate(8);
        assert!(buffer.write(6, &[0; 4]).is_err());
        assert!(buffer.read(9, &mut [0; 1]).is_err());
    }

    #[test]
    fn test_free_drops_table_reference_only() {
        let table = BufferTable::new();
        let buffer = table.allocate(8);
        assert_eq!(table.len(), 1);
        assert_eq!(Arc::strong_count(&buffer), 2);

        table.free(buffer.id()).unwrap();
        assert_eq!(table.len(), 0);
        // Our handle still keeps the storage alive.
        assert_eq!(Arc::strong_count(&buffer), 1);
        buffer.write(0, &[9]).unwrap();

        assert!(table.free(buffer.id()).is_err());
    }
}
