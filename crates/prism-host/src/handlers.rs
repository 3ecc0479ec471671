//! Host argument handlers
//!
//! Two handler shapes cover every host call: [`PrimitiveArg`] wraps one
//! serialized value, and [`RegionArg`] wraps a memory handle with the access
//! the caller grants. Host regions are always host-addressable, so a region
//! handler can yield ranges as well as the handle itself; pinning is a
//! reference-count on the backing buffer.

use crate::memory::host_buffer;
use prism_core::{
    AccessMode, ArgumentHandler, BackendKind, ConstRange, KernelArg, MemoryHandle, MutRange,
    RegionPin, Result, ScalarRepr, ScalarValue, TypeId,
};
use std::sync::Arc;

/// A single serialized value
pub struct PrimitiveArg {
    value: ScalarValue,
}

impl PrimitiveArg {
    pub fn new<T: ScalarRepr>(value: T) -> Result<Self> {
        Ok(Self {
            value: ScalarValue::of(value)?,
        })
    }

    /// Wrap an already-serialized value (application struct types)
    pub fn from_scalar(value: ScalarValue) -> Self {
        Self { value }
    }
}

impl ArgumentHandler for PrimitiveArg {
    fn backend(&self) -> BackendKind {
        BackendKind::Host
    }

    fn value_type(&self) -> TypeId {
        self.value.descriptor().id()
    }

    fn can_primitive(&self) -> bool {
        true
    }

    fn primitive(&self, _op_name: &str) -> Result<ScalarValue> {
        Ok(self.value.clone())
    }
}

/// A memory region with caller-granted access
pub struct RegionArg {
    handle: MemoryHandle,
    access: AccessMode,
}

impl RegionArg {
    pub fn new(handle: MemoryHandle, access: AccessMode) -> Self {
        Self { handle, access }
    }
}

impl ArgumentHandler for RegionArg {
    fn backend(&self) -> BackendKind {
        self.handle.backend()
    }

    fn value_type(&self) -> TypeId {
        self.handle.elem()
    }

    fn can_const_range(&self) -> bool {
        self.handle.backend() == BackendKind::Host
    }

    fn can_mut_range(&self) -> bool {
        self.handle.backend() == BackendKind::Host && self.access.is_writable()
    }

    fn can_handle(&self) -> bool {
        true
    }

    fn const_range(&self, op_name: &str) -> Result<ConstRange> {
        let buffer = host_buffer(self.handle.buffer())?;
        tracing::trace!(op = op_name, buffer = buffer.id(), "pin const range");
        Ok(ConstRange {
            ptr: unsafe { buffer.as_ptr().add(self.handle.offset()) },
            len_bytes: self.handle.len_bytes(),
            pin: Some(RegionPin::new(Arc::clone(self.handle.buffer()))),
        })
    }

    fn mut_range(&self, op_name: &str) -> Result<MutRange> {
        if !self.access.is_writable() {
            return Err(self.refuse(prism_core::Capability::MutRange));
        }
        let buffer = host_buffer(self.handle.buffer())?;
        tracing::trace!(op = op_name, buffer = buffer.id(), "pin mut range");
        Ok(MutRange {
            ptr: unsafe { buffer.as_mut_ptr().add(self.handle.offset()) },
            len_bytes: self.handle.len_bytes(),
            pin: Some(RegionPin::new(Arc::clone(self.handle.buffer()))),
        })
    }

    fn handle(&self, _op_name: &str) -> Result<MemoryHandle> {
        Ok(self.handle.clone())
    }
}

/// Wrap a scalar as a caller argument
pub fn value<T: ScalarRepr>(v: T) -> Result<KernelArg> {
    Ok(KernelArg::new(PrimitiveArg::new(v)?))
}

/// Wrap a region as a caller argument with the given access
pub fn region(handle: &MemoryHandle, access: AccessMode) -> KernelArg {
    KernelArg::new(RegionArg::new(handle.clone(), access))
}
