//! Back-end identities, device buffers, and memory handles
//!
//! A [`MemoryHandle`] is an opaque, reference-counted view over a buffer
//! owned by some back-end. Handles are shared freely between argument
//! handlers, bound kernels, and the back-end's own buffer table; the buffer
//! is released when the last holder drops.

use crate::error::{raw, Result};
use crate::types::TypeId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A concrete execution substrate
///
/// The name is the stable string back-ends advertise in the kernel registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BackendKind {
    /// In-process CPU back-end; executes kernel bodies on the calling thread
    Host,
    /// OpenCL devices
    OpenCl,
    /// Apple Metal devices
    Metal,
}

impl BackendKind {
    /// The registry name of this back-end
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::Host => "host",
            BackendKind::OpenCl => "opencl",
            BackendKind::Metal => "metal",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buffer owned by a back-end
///
/// Concrete buffer types live in their back-end crates; the dispatch layer
/// only sees this surface. Back-ends recover their own type through
/// `as_any` downcasting and must never observe another back-end's buffer
/// (`BackendMismatch` is raised at bind time before that can happen).
pub trait DeviceBuffer: Send + Sync + std::fmt::Debug {
    /// Which back-end owns this buffer
    fn backend(&self) -> BackendKind;

    /// Total capacity in bytes
    fn len_bytes(&self) -> usize;

    /// Downcast support for back-end implementations
    fn as_any(&self) -> &dyn Any;
}

/// Reference-counted typed view over a [`DeviceBuffer`]
#[derive(Clone)]
pub struct MemoryHandle {
    buffer: Arc<dyn DeviceBuffer>,
    offset: usize,
    len_bytes: usize,
    elem: TypeId,
}

impl MemoryHandle {
    /// View an entire buffer as elements of `elem`
    pub fn new(buffer: Arc<dyn DeviceBuffer>, elem: TypeId) -> Self {
        let len_bytes = buffer.len_bytes();
        Self {
            buffer,
            offset: 0,
            len_bytes,
            elem,
        }
    }

    /// View a sub-range `[offset, offset + len_bytes)` of a buffer
    pub fn with_range(
        buffer: Arc<dyn DeviceBuffer>,
        offset: usize,
        len_bytes: usize,
        elem: TypeId,
    ) -> Self {
        Self {
            buffer,
            offset,
            len_bytes,
            elem,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.buffer.backend()
    }

    /// The owning buffer
    pub fn buffer(&self) -> &Arc<dyn DeviceBuffer> {
        &self.buffer
    }

    /// Byte offset of this view within the buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of this view in bytes
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes == 0
    }

    /// Element type of this view
    pub fn elem(&self) -> TypeId {
        self.elem
    }

    /// The same range viewed as elements of another type
    pub fn viewed_as(&self, elem: TypeId) -> MemoryHandle {
        MemoryHandle {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            len_bytes: self.len_bytes,
            elem,
        }
    }

    /// Number of whole elements of `element_size` bytes in this view
    ///
    /// # Errors
    ///
    /// `SizeNotAligned` when the byte length is not an element multiple.
    pub fn elem_count(&self, element_size: usize) -> Result<usize> {
        if element_size == 0 || self.len_bytes % element_size != 0 {
            return Err(raw::size_not_aligned(element_size, self.len_bytes));
        }
        Ok(self.len_bytes / element_size)
    }
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryHandle({} {}..{} as {})",
            self.backend(),
            self.offset,
            self.offset + self.len_bytes,
            self.elem
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::TypeId;

    /// Minimal in-memory buffer for core-level tests
    pub(crate) struct TestBuffer {
        pub backend: BackendKind,
        pub len: usize,
    }

    impl DeviceBuffer for TestBuffer {
        fn backend(&self) -> BackendKind {
            self.backend
        }
        fn len_bytes(&self) -> usize {
            self.len
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub(crate) fn test_handle(backend: BackendKind, len: usize, elem: &'static str) -> MemoryHandle {
        MemoryHandle::new(Arc::new(TestBuffer { backend, len }), TypeId::new(elem))
    }

    #[test]
    fn test_elem_count() {
        let h = test_handle(BackendKind::Host, 16, "u32");
        assert_eq!(h.elem_count(4).unwrap(), 4);

        let err = h.elem_count(3).unwrap_err();
        assert!(matches!(err, Error::SizeNotAligned { byte_len: 16, .. }));
    }

    #[test]
    fn test_viewed_as_preserves_range() {
        let h = test_handle(BackendKind::Host, 16, "u32");
        let v = h.viewed_as(TypeId::new("f32"));
        assert_eq!(v.offset(), h.offset());
        assert_eq!(v.len_bytes(), h.len_bytes());
        assert_eq!(v.elem().name(), "f32");
    }

    #[test]
    fn test_handle_shares_buffer_count() {
        let h = test_handle(BackendKind::Host, 8, "u8");
        let before = Arc::strong_count(h.buffer());
        let clone = h.clone();
        assert_eq!(Arc::strong_count(h.buffer()), before + 1);
        drop(clone);
        assert_eq!(Arc::strong_count(h.buffer()), before);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::Host.as_str(), "host");
        assert_eq!(BackendKind::OpenCl.as_str(), "opencl");
        assert_eq!(BackendKind::Metal.as_str(), "metal");
    }
}
