//! Device contexts
//!
//! A context represents one opened device (or the host process itself): it
//! owns the buffer table, hands out queues, and materializes kernels from
//! the registry for its own back-end.

use crate::error::Result;
use crate::kernel::ComputeKernel;
use crate::memory::{BackendKind, MemoryHandle};
use crate::queue::ComputeQueue;
use crate::types::TypeId;
use std::any::Any;
use std::sync::Arc;

/// One opened device
pub trait ComputeContext: Send + Sync + std::fmt::Debug {
    /// Back-end this context belongs to
    fn backend(&self) -> BackendKind;

    /// Allocate a zero-initialized buffer of `len_elems` elements of `elem`
    fn allocate(&self, elem: TypeId, len_elems: usize) -> Result<MemoryHandle>;

    /// Allocate a buffer and copy `bytes` into it
    fn upload(&self, elem: TypeId, bytes: &[u8]) -> Result<MemoryHandle>;

    /// Copy a region's bytes back to the host
    fn download(&self, region: &MemoryHandle) -> Result<Vec<u8>>;

    /// Drop the context's own reference to a region's buffer
    ///
    /// Outstanding handles, pins, and bound kernels keep the buffer alive;
    /// the storage is reclaimed when the last of them drops.
    fn free(&self, region: &MemoryHandle) -> Result<()>;

    /// A queue submitting to this context
    fn queue(&self) -> Arc<dyn ComputeQueue>;

    /// Materialize a registered kernel for this context
    fn kernel(&self, name: &str) -> Result<Arc<dyn ComputeKernel>>;

    /// Downcast support for back-end implementations
    fn as_any(&self) -> &dyn Any;
}
