//! The host device context
//!
//! `HostContext` owns the buffer table for in-process memory and hands out
//! the synchronous [`HostQueue`](crate::queue::HostQueue). Kernels are
//! materialized from the process-wide registry under the `"host"` back-end
//! name.

use crate::memory::{host_buffer, BufferTable};
use crate::queue::HostQueue;
use prism_core::{
    lookup_kernel, lookup_type, BackendKind, ComputeContext, ComputeKernel, ComputeQueue, Error,
    MemoryHandle, Result, TypeId,
};
use std::any::Any;
use std::sync::Arc;

pub struct HostContext {
    table: BufferTable,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext").finish()
    }
}

impl HostContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table: BufferTable::new(),
        })
    }

    /// Number of buffers the context still references
    pub fn live_buffers(&self) -> usize {
        self.table.len()
    }
}

impl ComputeContext for HostContext {
    fn backend(&self) -> BackendKind {
        BackendKind::Host
    }

    #[tracing::instrument(skip(self))]
    fn allocate(&self, elem: TypeId, len_elems: usize) -> Result<MemoryHandle> {
        let desc = lookup_type(elem.name())?;
        let buffer = self.table.allocate(len_elems * desc.size());
        Ok(MemoryHandle::new(buffer, elem))
    }

    fn upload(&self, elem: TypeId, bytes: &[u8]) -> Result<MemoryHandle> {
        let desc = lookup_type(elem.name())?;
        let len_elems = if desc.size() == 0 {
            0
        } else {
            bytes.len() / desc.size()
        };
        let handle = self.allocate(elem, len_elems)?;
        if bytes.len() != handle.len_bytes() {
            return Err(Error::execution(format!(
                "upload of {} bytes is not a whole number of {elem} elements",
                bytes.len()
            )));
        }
        host_buffer(handle.buffer())?.write(handle.offset(), bytes)?;
        Ok(handle)
    }

    fn download(&self, region: &MemoryHandle) -> Result<Vec<u8>> {
        let buffer = host_buffer(region.buffer())?;
        let mut out = vec![0u8; region.len_bytes()];
        buffer.read(region.offset(), &mut out)?;
        Ok(out)
    }

    fn free(&self, region: &MemoryHandle) -> Result<()> {
        let buffer = host_buffer(region.buffer())?;
        self.table.free(buffer.id())
    }

    fn queue(&self) -> Arc<dyn ComputeQueue> {
        HostQueue::new()
    }

    fn kernel(&self, name: &str) -> Result<Arc<dyn ComputeKernel>> {
        let factory = lookup_kernel(BackendKind::Host, name)?;
        factory(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Open a context for the requested back-end
///
/// The host back-end is always available. OpenCL and Metal contexts require
/// their device toolchains, which this build does not link; requesting them
/// reports `BackendUnavailable`.
#[tracing::instrument]
pub fn open_context(kind: BackendKind) -> Result<Arc<dyn ComputeContext>> {
    match kind {
        BackendKind::Host => Ok(HostContext::new()),
        BackendKind::OpenCl => Err(Error::BackendUnavailable(
            kind,
            "OpenCL toolchain not linked into this build".to_string(),
        )),
        BackendKind::Metal => Err(Error::BackendUnavailable(
            kind,
            "Metal is only available on Apple platforms".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_context_host_only() {
        assert_eq!(
            open_context(BackendKind::Host).unwrap().backend(),
            BackendKind::Host
        );
        assert!(matches!(
            open_context(BackendKind::OpenCl).unwrap_err(),
            Error::BackendUnavailable(BackendKind::OpenCl, _)
        ));
        assert!(matches!(
            open_context(BackendKind::Metal).unwrap_err(),
            Error::BackendUnavailable(BackendKind::Metal, _)
        ));
    }

    #[test]
    fn test_allocate_upload_download() {
        let ctx = HostContext::new();
        let data: Vec<u8> = (0..16).collect();
        let handle = ctx.upload(TypeId::new("u32"), &data).unwrap();
        assert_eq!(handle.len_bytes(), 16);
        assert_eq!(ctx.download(&handle).unwrap(), data);
    }

    #[test]
    fn test_upload_rejects_partial_elements() {
        let ctx = HostContext::new();
        assert!(ctx.upload(TypeId::new("u32"), &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_free_keeps_outstanding_handles_valid() {
        let ctx = HostContext::new();
        let handle = ctx.allocate(TypeId::new("u32"), 4).unwrap();
        assert_eq!(ctx.live_buffers(), 1);
        ctx.free(&handle).unwrap();
        assert_eq!(ctx.live_buffers(), 0);
        // The handle still reads; only the table's reference was dropped.
        assert_eq!(ctx.download(&handle).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn test_unknown_element_type_rejected() {
        let ctx = HostContext::new();
        assert!(ctx.allocate(TypeId::new("mat4"), 1).is_err());
    }
}
